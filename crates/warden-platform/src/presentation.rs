//! Human-readable outcome lines for lifecycle operations.

const OK: &str = "\x1b[32mOK\x1b[0m";
const FAILED: &str = "\x1b[31mFAILED\x1b[0m";

/// Append the colored, tab-separated outcome column to an action label:
/// `Install Echo service:` becomes `Install Echo service: ... [  OK  ]`.
pub fn outcome_line(action: &str, ok: bool) -> String {
    if ok {
        format!("{action}\t\t\t\t\t[  {OK}  ]")
    } else {
        format!("{action}\t\t\t\t\t[{FAILED}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_column_carries_the_verdict() {
        let ok = outcome_line("Install Echo service:", true);
        assert!(ok.starts_with("Install Echo service:"));
        assert!(ok.contains("OK"));

        let failed = outcome_line("Stopping Echo service:", false);
        assert!(failed.contains("FAILED"));
    }
}
