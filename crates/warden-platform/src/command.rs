//! The native command invocation boundary.
//!
//! Backends never touch `std::process::Command` directly; they go through
//! a [`CommandRunner`] so tests can observe and script every native
//! invocation.

use std::process::Command;

/// Captured result of one native tool invocation. A nonzero exit is a
/// normal output with `success == false`; native status tools routinely
/// exit nonzero to mean "not running", which is domain information, not
/// failure.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally.
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs a native tool to completion, blocking. An `Err` means the tool
/// could not be spawned at all (typically: not on PATH).
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        (**self).run(program, args)
    }
}

/// The production runner, backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
