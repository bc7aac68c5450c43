//! Service Control Manager backend, driven through `sc.exe`.
//!
//! The SCM keeps service registrations in its own database, so there is
//! no config file to look at: `sc.exe queryex` is both the installed
//! check and the run-state probe. A host where `sc.exe` cannot be
//! spawned reports NotInstalled and mutating operations surface the
//! spawn failure as `NativeCommand`.

use regex::Regex;
use tracing::{debug, info};

use warden_platform::command::{CommandOutput, CommandRunner};
use warden_platform::presentation::outcome_line;
use warden_platform::privilege::PrivilegeProbe;
use warden_platform::quote::win_arg;
use warden_platform::{
    lookup, Result, ServiceBackend, ServiceDescriptor, ServiceError, ServiceState,
};

const SC: &str = "sc.exe";

pub struct ScmBackend {
    descriptor: ServiceDescriptor,
    runner: Box<dyn CommandRunner>,
    privilege: Box<dyn PrivilegeProbe>,
    /// Matches the `STATE : 4  RUNNING` line of `sc.exe queryex`.
    state_re: Regex,
    /// Matches the `PID : 4321` line of `sc.exe queryex`.
    pid_re: Regex,
}

impl ScmBackend {
    #[cfg(target_os = "windows")]
    pub fn new(descriptor: ServiceDescriptor) -> Result<Self> {
        use warden_platform::command::SystemRunner;
        use warden_platform::ServiceKind;

        if descriptor.kind == ServiceKind::UserAgent {
            return Err(ServiceError::PlatformUnsupported(
                "the Windows SCM has no per-user service model".to_string(),
            ));
        }
        Ok(Self::with_parts(
            descriptor,
            Box::new(SystemRunner),
            Box::new(crate::privilege::ElevationProbe),
        ))
    }

    /// Construct with explicit seams; used by tests.
    pub fn with_parts(
        descriptor: ServiceDescriptor,
        runner: Box<dyn CommandRunner>,
        privilege: Box<dyn PrivilegeProbe>,
    ) -> Self {
        Self {
            descriptor,
            runner,
            privilege,
            state_re: Regex::new(r"STATE\s*:\s*\d+\s+([A-Z_]+)").expect("invalid sc state regex"),
            pid_re: Regex::new(r"PID\s*:\s*(\d+)").expect("invalid sc pid regex"),
        }
    }

    fn ensure_privileges(&self) -> Result<()> {
        if self.privilege.has_privileges() {
            Ok(())
        } else {
            Err(ServiceError::PrivilegeRequired)
        }
    }

    fn sc(&self, args: &[&str]) -> Result<CommandOutput> {
        let out = self
            .runner
            .run(SC, args)
            .map_err(|err| ServiceError::NativeCommand(format!("sc.exe: {err}")))?;
        if !out.success {
            let detail = if out.stderr.trim().is_empty() {
                out.stdout.trim().to_string()
            } else {
                out.stderr.trim().to_string()
            };
            return Err(ServiceError::NativeCommand(format!(
                "sc.exe {} failed: {detail}",
                args.first().copied().unwrap_or_default()
            )));
        }
        Ok(out)
    }

    fn probe(&self) -> ServiceState {
        let out = match self
            .runner
            .run(SC, &["queryex", &self.descriptor.name])
        {
            Ok(out) => out,
            Err(err) => {
                debug!(service = %self.descriptor.name, %err, "sc.exe unavailable");
                return ServiceState::NotInstalled;
            }
        };
        if !out.success {
            // 1060: the specified service does not exist
            let text = format!("{}{}", out.stdout, out.stderr);
            if text.contains("1060") || text.contains("does not exist") {
                return ServiceState::NotInstalled;
            }
            return ServiceState::Stopped;
        }

        let running = self
            .state_re
            .captures(&out.stdout)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str() == "RUNNING")
            .unwrap_or(false);
        if !running {
            return ServiceState::Stopped;
        }

        let pid = self
            .pid_re
            .captures(&out.stdout)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .filter(|pid| *pid > 0);
        ServiceState::Running { pid }
    }
}

impl ServiceBackend for ScmBackend {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn install(&self, extra_args: &[String]) -> Result<String> {
        let action = format!("Install {}:", self.descriptor.description);
        self.ensure_privileges()?;
        if self.probe().is_installed() {
            return Err(ServiceError::AlreadyInstalled);
        }

        let exec_path = lookup::executable_path(&self.descriptor.name)?;
        let args = render_create_args(&self.descriptor, &exec_path.to_string_lossy(), extra_args);
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        self.sc(&borrowed)?;

        // the description has its own verb; a failure here is cosmetic
        let _ = self.sc(&[
            "description",
            &self.descriptor.name,
            &self.descriptor.description,
        ]);

        info!(service = %self.descriptor.name, "registered with the service control manager");
        Ok(outcome_line(&action, true))
    }

    fn remove(&self) -> Result<String> {
        let action = format!("Removing {}:", self.descriptor.description);
        self.ensure_privileges()?;
        let state = self.probe();
        if !state.is_installed() {
            return Err(ServiceError::NotInstalled);
        }

        if state.is_running() {
            let _ = self.sc(&["stop", &self.descriptor.name]);
            // give the SCM a moment to wind the service down
            std::thread::sleep(std::time::Duration::from_secs(2));
        }
        self.sc(&["delete", &self.descriptor.name])?;

        info!(service = %self.descriptor.name, "unregistered from the service control manager");
        Ok(outcome_line(&action, true))
    }

    fn start(&self) -> Result<String> {
        let action = format!("Starting {}:", self.descriptor.description);
        self.ensure_privileges()?;
        let state = self.probe();
        if !state.is_installed() {
            return Err(ServiceError::NotInstalled);
        }
        if state.is_running() {
            return Err(ServiceError::AlreadyRunning);
        }

        self.sc(&["start", &self.descriptor.name])?;
        Ok(outcome_line(&action, true))
    }

    fn stop(&self) -> Result<String> {
        let action = format!("Stopping {}:", self.descriptor.description);
        self.ensure_privileges()?;
        let state = self.probe();
        if !state.is_installed() {
            return Err(ServiceError::NotInstalled);
        }
        if !state.is_running() {
            return Err(ServiceError::AlreadyStopped);
        }

        self.sc(&["stop", &self.descriptor.name])?;
        Ok(outcome_line(&action, true))
    }

    fn status(&self) -> Result<String> {
        // `sc.exe queryex` works without elevation
        let state = self.probe();
        if !state.is_installed() {
            return Err(ServiceError::NotInstalled);
        }
        Ok(state.status_line())
    }

    fn state(&self) -> Result<ServiceState> {
        Ok(self.probe())
    }
}

/// The SCM equivalent of a rendered config file: the full `sc.exe create`
/// argument vector.
fn render_create_args(
    descriptor: &ServiceDescriptor,
    exec_path: &str,
    extra_args: &[String],
) -> Vec<String> {
    let mut bin_path = win_arg(exec_path);
    for arg in extra_args {
        bin_path.push(' ');
        bin_path.push_str(&win_arg(arg));
    }

    let mut args = vec![
        "create".to_string(),
        descriptor.name.clone(),
        format!("binPath={bin_path}"),
        format!("DisplayName={}", descriptor.description),
        "start=auto".to_string(),
        "type=own".to_string(),
    ];
    if !descriptor.dependencies.is_empty() {
        args.push(format!("depend={}", descriptor.dependencies.join("/")));
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_platform::testing::{FixedPrivileges, ScriptedRunner};
    use warden_platform::ServiceKind;

    const QUERY_RUNNING: &str = "SERVICE_NAME: echosvc\n        TYPE               : 10  WIN32_OWN_PROCESS\n        STATE              : 4  RUNNING\n                                (STOPPABLE, NOT_PAUSABLE, ACCEPTS_SHUTDOWN)\n        WIN32_EXIT_CODE    : 0  (0x0)\n        SERVICE_EXIT_CODE  : 0  (0x0)\n        CHECKPOINT         : 0x0\n        WAIT_HINT          : 0x0\n        PID                : 4321\n        FLAGS              :\n";

    const QUERY_STOPPED: &str = "SERVICE_NAME: echosvc\n        TYPE               : 10  WIN32_OWN_PROCESS\n        STATE              : 1  STOPPED\n        WIN32_EXIT_CODE    : 1077  (0x435)\n        SERVICE_EXIT_CODE  : 0  (0x0)\n        CHECKPOINT         : 0x0\n        WAIT_HINT          : 0x0\n        PID                : 0\n        FLAGS              :\n";

    const QUERY_MISSING: &str =
        "[SC] EnumQueryServicesStatus:OpenService FAILED 1060:\n\nThe specified service does not exist as an installed service.\n";

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new("echosvc", "Echo service", ServiceKind::SystemDaemon)
    }

    fn backend(runner: ScriptedRunner) -> ScmBackend {
        ScmBackend::with_parts(descriptor(), Box::new(runner), Box::new(FixedPrivileges(true)))
    }

    #[test]
    fn create_args_quote_the_command_line() {
        let args = render_create_args(
            &descriptor().with_dependencies(["Tcpip", "Dnscache"]),
            r"C:\Program Files\echosvc\echosvc.exe",
            &["--port".to_string(), "9977".to_string()],
        );

        assert_eq!(args[0], "create");
        assert_eq!(args[1], "echosvc");
        assert_eq!(
            args[2],
            "binPath=\"C:\\Program Files\\echosvc\\echosvc.exe\" --port 9977"
        );
        assert!(args.contains(&"start=auto".to_string()));
        assert!(args.contains(&"depend=Tcpip/Dnscache".to_string()));
    }

    #[test]
    fn probe_parses_running_state_and_pid() {
        let runner = ScriptedRunner::new();
        runner.respond_when(SC, "queryex", CommandOutput::success(QUERY_RUNNING));
        let backend = backend(runner);

        assert_eq!(
            backend.state().unwrap(),
            ServiceState::Running { pid: Some(4321) }
        );
        assert_eq!(backend.status().unwrap(), "Service (pid 4321) is running...");
    }

    #[test]
    fn probe_parses_stopped_state() {
        let runner = ScriptedRunner::new();
        runner.respond_when(SC, "queryex", CommandOutput::success(QUERY_STOPPED));
        let backend = backend(runner);

        assert_eq!(backend.state().unwrap(), ServiceState::Stopped);
    }

    #[test]
    fn unknown_service_is_not_installed() {
        let runner = ScriptedRunner::new();
        runner.respond_when(SC, "queryex", CommandOutput::failure(1060, QUERY_MISSING));
        let backend = backend(runner);

        assert_eq!(backend.state().unwrap(), ServiceState::NotInstalled);
        assert!(matches!(
            backend.status().unwrap_err(),
            ServiceError::NotInstalled
        ));
    }

    #[test]
    fn install_issues_create_then_description() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_when(SC, "queryex", CommandOutput::failure(1060, QUERY_MISSING));
        let backend = ScmBackend::with_parts(
            descriptor(),
            Box::new(runner.clone()),
            Box::new(FixedPrivileges(true)),
        );

        backend.install(&["--verbose".to_string()]).unwrap();

        let invocations = runner.invocations();
        let create = invocations
            .iter()
            .find(|inv| inv.args.first().map(String::as_str) == Some("create"))
            .unwrap();
        assert_eq!(create.args[1], "echosvc");
        assert!(create.args[2].starts_with("binPath="));
        assert!(create.args[2].ends_with("--verbose"));
        assert!(invocations
            .iter()
            .any(|inv| inv.args.first().map(String::as_str) == Some("description")));
    }

    #[test]
    fn install_on_an_existing_service_is_rejected() {
        let runner = ScriptedRunner::new();
        runner.respond_when(SC, "queryex", CommandOutput::success(QUERY_STOPPED));
        let backend = backend(runner);

        assert!(matches!(
            backend.install(&[]).unwrap_err(),
            ServiceError::AlreadyInstalled
        ));
    }

    #[test]
    fn missing_sc_tool_fails_install_with_native_command() {
        struct NoTool;
        impl CommandRunner for NoTool {
            fn run(&self, _: &str, _: &[&str]) -> std::io::Result<CommandOutput> {
                Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "program not found",
                ))
            }
        }

        let backend = ScmBackend::with_parts(
            descriptor(),
            Box::new(NoTool),
            Box::new(FixedPrivileges(true)),
        );
        // the probe sees no SCM at all, so install proceeds to `sc.exe
        // create` and surfaces the spawn failure
        assert!(matches!(
            backend.install(&[]).unwrap_err(),
            ServiceError::NativeCommand(_)
        ));
    }

    #[test]
    fn unprivileged_mutations_never_invoke_sc() {
        let runner = Arc::new(ScriptedRunner::new());
        let backend = ScmBackend::with_parts(
            descriptor(),
            Box::new(runner.clone()),
            Box::new(FixedPrivileges(false)),
        );

        assert!(matches!(
            backend.install(&[]).unwrap_err(),
            ServiceError::PrivilegeRequired
        ));
        assert!(matches!(
            backend.remove().unwrap_err(),
            ServiceError::PrivilegeRequired
        ));
        assert!(runner.invocations().is_empty());
    }

    #[test]
    fn start_and_stop_respect_current_state() {
        let runner = ScriptedRunner::new();
        runner.respond_when(SC, "queryex", CommandOutput::success(QUERY_RUNNING));
        let backend = backend(runner);
        assert!(matches!(
            backend.start().unwrap_err(),
            ServiceError::AlreadyRunning
        ));

        let runner = ScriptedRunner::new();
        runner.respond_when(SC, "queryex", CommandOutput::success(QUERY_STOPPED));
        let backend = self::backend(runner);
        assert!(matches!(
            backend.stop().unwrap_err(),
            ServiceError::AlreadyStopped
        ));
    }
}
