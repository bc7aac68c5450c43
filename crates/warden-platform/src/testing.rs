//! Test doubles for the command and privilege seams.
//!
//! Used by the backend crates' unit tests; kept in the library so every
//! backend exercises the same doubles.

use std::sync::Mutex;

use crate::command::{CommandOutput, CommandRunner};
use crate::privilege::PrivilegeProbe;

/// One recorded native invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

struct Script {
    program: String,
    /// When set, the rule only matches invocations carrying this argument.
    arg: Option<String>,
    output: CommandOutput,
}

/// Runner that records every invocation and replays scripted outputs.
/// Invocations with no matching script succeed with empty output, so
/// happy-path flows need only script the calls they assert on.
#[derive(Default)]
pub struct ScriptedRunner {
    invocations: Mutex<Vec<Invocation>>,
    scripts: Mutex<Vec<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to every invocation of `program` with `output`.
    pub fn respond(&self, program: &str, output: CommandOutput) {
        self.scripts.lock().unwrap().push(Script {
            program: program.to_string(),
            arg: None,
            output,
        });
    }

    /// Respond only when the invocation of `program` carries `arg`
    /// anywhere on its command line. More specific rules win because they
    /// are matched in insertion order.
    pub fn respond_when(&self, program: &str, arg: &str, output: CommandOutput) {
        self.scripts.lock().unwrap().push(Script {
            program: program.to_string(),
            arg: Some(arg.to_string()),
            output,
        });
    }

    /// Everything run through this runner so far, in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        self.invocations.lock().unwrap().push(Invocation {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        });

        let scripts = self.scripts.lock().unwrap();
        for script in scripts.iter() {
            if script.program != program {
                continue;
            }
            match &script.arg {
                Some(arg) if !args.iter().any(|a| a == arg) => continue,
                _ => return Ok(script.output.clone()),
            }
        }
        Ok(CommandOutput::success(""))
    }
}

/// Privilege probe pinned to a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrivileges(pub bool);

impl PrivilegeProbe for FixedPrivileges {
    fn has_privileges(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_invocations_in_order() {
        let runner = ScriptedRunner::new();
        runner.run("systemctl", &["daemon-reload"]).unwrap();
        runner.run("systemctl", &["enable", "echosvc.service"]).unwrap();

        let seen = runner.invocations();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].args, vec!["daemon-reload"]);
        assert_eq!(seen[1].program, "systemctl");
    }

    #[test]
    fn scripted_rules_match_by_program_and_arg() {
        let runner = ScriptedRunner::new();
        runner.respond_when("systemctl", "show", CommandOutput::success("ActiveState=active\n"));
        runner.respond("systemctl", CommandOutput::failure(1, "no"));

        let show = runner.run("systemctl", &["show", "echosvc.service"]).unwrap();
        assert!(show.stdout.contains("active"));

        let other = runner.run("systemctl", &["start", "echosvc.service"]).unwrap();
        assert!(!other.success);
    }

    #[test]
    fn unscripted_invocations_succeed_quietly() {
        let runner = ScriptedRunner::new();
        let out = runner.run("launchctl", &["load", "/tmp/x.plist"]).unwrap();
        assert!(out.success);
        assert!(out.stdout.is_empty());
    }
}
