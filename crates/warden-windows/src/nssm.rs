//! NSSM backend, driven through `nssm.exe`.
//!
//! NSSM keeps its configuration in its own store and is configured by a
//! short sequence of `nssm set` invocations after `nssm install`; that
//! sequence is this backend's rendered "config".

use tracing::{debug, info};

use warden_platform::command::{CommandOutput, CommandRunner};
use warden_platform::presentation::outcome_line;
use warden_platform::privilege::PrivilegeProbe;
use warden_platform::quote::win_arg;
use warden_platform::{
    lookup, Result, ServiceBackend, ServiceDescriptor, ServiceError, ServiceState,
};

const NSSM: &str = "nssm.exe";

pub struct NssmBackend {
    descriptor: ServiceDescriptor,
    runner: Box<dyn CommandRunner>,
    privilege: Box<dyn PrivilegeProbe>,
}

impl NssmBackend {
    #[cfg(target_os = "windows")]
    pub fn new(descriptor: ServiceDescriptor) -> Result<Self> {
        use warden_platform::command::SystemRunner;
        use warden_platform::ServiceKind;

        if descriptor.kind == ServiceKind::UserAgent {
            return Err(ServiceError::PlatformUnsupported(
                "NSSM services are registered system-wide".to_string(),
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
        }
    }

    fn ensure_privileges(&self) -> Result<()> {
        if self.privilege.has_privileges() {
            Ok(())
        } else {
            Err(ServiceError::PrivilegeRequired)
        }
    }

    fn nssm(&self, args: &[&str]) -> Result<CommandOutput> {
        let out = self
            .runner
            .run(NSSM, args)
            .map_err(|err| ServiceError::NativeCommand(format!("nssm.exe: {err}")))?;
        if !out.success {
            let detail = if out.stderr.trim().is_empty() {
                out.stdout.trim().to_string()
            } else {
                out.stderr.trim().to_string()
            };
            return Err(ServiceError::NativeCommand(format!(
                "nssm.exe {} failed: {detail}",
                args.first().copied().unwrap_or_default()
            )));
        }
        Ok(out)
    }

    /// `nssm status` prints a single SERVICE_* token; nssm itself exits
    /// nonzero ("Can't open service!") when nothing is registered under
    /// the name. NSSM does not report a pid.
    fn probe(&self) -> ServiceState {
        let out = match self.runner.run(NSSM, &["status", &self.descriptor.name]) {
            Ok(out) => out,
            Err(err) => {
                debug!(service = %self.descriptor.name, %err, "nssm.exe unavailable");
                return ServiceState::NotInstalled;
            }
        };
        if !out.success {
            return ServiceState::NotInstalled;
        }
        if out.stdout.contains("SERVICE_RUNNING") {
            ServiceState::Running { pid: None }
        } else {
            ServiceState::Stopped
        }
    }
}

impl ServiceBackend for NssmBackend {
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
        for command in
            render_install_commands(&self.descriptor, &exec_path.to_string_lossy(), extra_args)
        {
            let borrowed: Vec<&str> = command.iter().map(String::as_str).collect();
            self.nssm(&borrowed)?;
        }

        info!(service = %self.descriptor.name, "registered with nssm");
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
            let _ = self.nssm(&["stop", &self.descriptor.name]);
        }
        self.nssm(&["remove", &self.descriptor.name, "confirm"])?;

        info!(service = %self.descriptor.name, "unregistered from nssm");
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

        self.nssm(&["start", &self.descriptor.name])?;
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

        self.nssm(&["stop", &self.descriptor.name])?;
        Ok(outcome_line(&action, true))
    }

    fn status(&self) -> Result<String> {
        // `nssm status` works without elevation
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

/// The invocation sequence that registers and configures the service;
/// NSSM's equivalent of a rendered config file.
fn render_install_commands(
    descriptor: &ServiceDescriptor,
    exec_path: &str,
    extra_args: &[String],
) -> Vec<Vec<String>> {
    let name = &descriptor.name;
    let mut commands = vec![vec![
        "install".to_string(),
        name.clone(),
        exec_path.to_string(),
    ]];

    if !extra_args.is_empty() {
        let joined = extra_args
            .iter()
            .map(|arg| win_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");
        commands.push(vec![
            "set".to_string(),
            name.clone(),
            "AppParameters".to_string(),
            joined,
        ]);
    }

    commands.push(vec![
        "set".to_string(),
        name.clone(),
        "Description".to_string(),
        descriptor.description.clone(),
    ]);
    commands.push(vec![
        "set".to_string(),
        name.clone(),
        "Start".to_string(),
        "SERVICE_AUTO_START".to_string(),
    ]);

    if !descriptor.dependencies.is_empty() {
        let mut depend = vec!["set".to_string(), name.clone(), "DependOnService".to_string()];
        depend.extend(descriptor.dependencies.iter().cloned());
        commands.push(depend);
    }

    commands
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use warden_platform::testing::{FixedPrivileges, ScriptedRunner};
    use warden_platform::ServiceKind;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new("echosvc", "Echo service", ServiceKind::SystemDaemon)
    }

    #[test]
    fn install_sequence_registers_then_configures() {
        let commands = render_install_commands(
            &descriptor().with_dependencies(["Tcpip"]),
            r"C:\srv\echosvc.exe",
            &["--motd".to_string(), "hello world".to_string()],
        );

        assert_eq!(commands[0], vec!["install", "echosvc", r"C:\srv\echosvc.exe"]);
        assert_eq!(
            commands[1],
            vec!["set", "echosvc", "AppParameters", "--motd \"hello world\""]
        );
        assert_eq!(
            commands[2],
            vec!["set", "echosvc", "Description", "Echo service"]
        );
        assert_eq!(
            commands[3],
            vec!["set", "echosvc", "Start", "SERVICE_AUTO_START"]
        );
        assert_eq!(
            commands[4],
            vec!["set", "echosvc", "DependOnService", "Tcpip"]
        );
    }

    #[test]
    fn status_tokens_map_to_states() {
        let runner = ScriptedRunner::new();
        runner.respond_when(NSSM, "status", CommandOutput::success("SERVICE_RUNNING\r\n"));
        let backend = NssmBackend::with_parts(
            descriptor(),
            Box::new(runner),
            Box::new(FixedPrivileges(true)),
        );
        assert_eq!(backend.state().unwrap(), ServiceState::Running { pid: None });
        assert_eq!(backend.status().unwrap(), "Service is running...");

        let runner = ScriptedRunner::new();
        runner.respond_when(NSSM, "status", CommandOutput::success("SERVICE_STOPPED\r\n"));
        let backend = NssmBackend::with_parts(
            descriptor(),
            Box::new(runner),
            Box::new(FixedPrivileges(true)),
        );
        assert_eq!(backend.state().unwrap(), ServiceState::Stopped);
    }

    #[test]
    fn unregistered_service_is_not_installed() {
        let runner = ScriptedRunner::new();
        runner.respond_when(NSSM, "status", CommandOutput::failure(3, "Can't open service!"));
        let backend = NssmBackend::with_parts(
            descriptor(),
            Box::new(runner),
            Box::new(FixedPrivileges(true)),
        );

        assert_eq!(backend.state().unwrap(), ServiceState::NotInstalled);
        assert!(matches!(
            backend.stop().unwrap_err(),
            ServiceError::NotInstalled
        ));
    }

    #[test]
    fn install_runs_every_configuration_step() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond_when(NSSM, "status", CommandOutput::failure(3, "Can't open service!"));
        let backend = NssmBackend::with_parts(
            descriptor(),
            Box::new(runner.clone()),
            Box::new(FixedPrivileges(true)),
        );

        backend.install(&[]).unwrap();

        let verbs: Vec<String> = runner
            .invocations()
            .into_iter()
            .skip(1) // the initial status probe
            .map(|inv| inv.args[0].clone())
            .collect();
        assert_eq!(verbs, vec!["install", "set", "set"]);
    }

    #[test]
    fn unprivileged_mutations_never_invoke_nssm() {
        let runner = Arc::new(ScriptedRunner::new());
        let backend = NssmBackend::with_parts(
            descriptor(),
            Box::new(runner.clone()),
            Box::new(FixedPrivileges(false)),
        );

        assert!(matches!(
            backend.start().unwrap_err(),
            ServiceError::PrivilegeRequired
        ));
        assert!(runner.invocations().is_empty());
    }
}
