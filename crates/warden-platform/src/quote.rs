//! Dialect-aware quoting for the config renderers.
//!
//! Caller-supplied extra arguments end up inside systemd units, shell
//! scripts, plists and `sc.exe` parameter strings; each destination has
//! its own escaping rules and getting them wrong is an injection hole.

/// Quote one argument for a systemd `ExecStart=` line.
pub fn unit_arg(arg: &str) -> String {
    let needs_quoting =
        arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\\');
    if !needs_quoting {
        return arg.to_string();
    }
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    for c in arg.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Quote one argument for a POSIX shell command line.
pub fn sh_arg(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=' | ':'));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Quote one argument for a `sc.exe binPath=` command string.
pub fn win_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '"']) {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('"', "\\\""))
}

/// Escape text for an XML element body.
pub fn xml_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_args_pass_plain_tokens_through() {
        assert_eq!(unit_arg("--verbose"), "--verbose");
        assert_eq!(unit_arg("/usr/local/bin/echosvc"), "/usr/local/bin/echosvc");
    }

    #[test]
    fn unit_args_quote_whitespace_and_escapes() {
        assert_eq!(unit_arg("hello world"), r#""hello world""#);
        assert_eq!(unit_arg(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(unit_arg(""), r#""""#);
    }

    #[test]
    fn sh_args_single_quote_anything_suspicious() {
        assert_eq!(sh_arg("--port=9977"), "--port=9977");
        assert_eq!(sh_arg("a b"), "'a b'");
        assert_eq!(sh_arg("$(reboot)"), "'$(reboot)'");
        assert_eq!(sh_arg("it's"), r"'it'\''s'");
    }

    #[test]
    fn win_args_quote_spaces_and_inner_quotes() {
        assert_eq!(win_arg("--flag"), "--flag");
        assert_eq!(win_arg("C:\\Program Files\\x"), "\"C:\\Program Files\\x\"");
        assert_eq!(win_arg("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn xml_text_escapes_markup() {
        assert_eq!(xml_text("a < b & c > d"), "a &lt; b &amp; c &gt; d");
    }
}
