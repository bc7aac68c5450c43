//! Upstart backend: job files under `/etc/init`, lifecycle via `initctl`.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};

use warden_platform::command::{CommandOutput, CommandRunner, SystemRunner};
use warden_platform::presentation::outcome_line;
use warden_platform::privilege::PrivilegeProbe;
use warden_platform::quote::sh_arg;
use warden_platform::{
    lookup, Result, ServiceBackend, ServiceDescriptor, ServiceError, ServiceState, UnitFile,
};

const JOB_DIR: &str = "/etc/init";

pub struct UpstartBackend {
    descriptor: ServiceDescriptor,
    job_dir: PathBuf,
    runner: Box<dyn CommandRunner>,
    privilege: Box<dyn PrivilegeProbe>,
    /// Matches `initctl status` output like `echosvc start/running, process 4321`.
    running_re: Regex,
}

impl UpstartBackend {
    #[cfg(unix)]
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        use warden_platform::privilege::RootGroupProbe;

        Self::with_parts(
            descriptor,
            PathBuf::from(JOB_DIR),
            Box::new(SystemRunner),
            Box::new(RootGroupProbe),
        )
    }

    /// Construct with explicit seams; used by tests.
    pub fn with_parts(
        descriptor: ServiceDescriptor,
        job_dir: PathBuf,
        runner: Box<dyn CommandRunner>,
        privilege: Box<dyn PrivilegeProbe>,
    ) -> Self {
        Self {
            descriptor,
            job_dir,
            runner,
            privilege,
            running_re: Regex::new(r"start/running(?:, process (\d+))?")
                .expect("invalid upstart status regex"),
        }
    }

    fn job_path(&self) -> PathBuf {
        self.job_dir.join(format!("{}.conf", self.descriptor.name))
    }

    fn ensure_privileges(&self) -> Result<()> {
        if self.privilege.has_privileges() {
            Ok(())
        } else {
            Err(ServiceError::PrivilegeRequired)
        }
    }

    fn initctl(&self, args: &[&str]) -> Result<CommandOutput> {
        let out = self
            .runner
            .run("initctl", args)
            .map_err(|err| ServiceError::NativeCommand(format!("initctl: {err}")))?;
        if !out.success {
            return Err(ServiceError::NativeCommand(format!(
                "initctl {} failed: {}",
                args.first().copied().unwrap_or_default(),
                out.stderr.trim()
            )));
        }
        Ok(out)
    }

    fn probe(&self) -> ServiceState {
        if !self.job_path().exists() {
            return ServiceState::NotInstalled;
        }

        let out = match self.runner.run("initctl", &["status", &self.descriptor.name]) {
            Ok(out) => out,
            Err(err) => {
                debug!(service = %self.descriptor.name, %err, "status probe failed, assuming stopped");
                return ServiceState::Stopped;
            }
        };
        // `initctl status` exits nonzero for unknown jobs; the job file on
        // disk still counts as installed.
        if !out.success {
            return ServiceState::Stopped;
        }

        match self.running_re.captures(&out.stdout) {
            Some(caps) => {
                let pid = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
                ServiceState::Running { pid }
            }
            None => ServiceState::Stopped,
        }
    }
}

impl ServiceBackend for UpstartBackend {
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
        let job = render_job(&self.descriptor, &exec_path, extra_args);
        UnitFile::new(self.job_path(), job).write()?;

        info!(job = %self.job_path().display(), "installed upstart job");
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
            let _ = self.initctl(&["stop", &self.descriptor.name]);
        }
        std::fs::remove_file(self.job_path()).map_err(|err| {
            ServiceError::NativeCommand(format!(
                "cannot remove {}: {err}",
                self.job_path().display()
            ))
        })?;

        info!(job = %self.job_path().display(), "removed upstart job");
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

        self.initctl(&["start", &self.descriptor.name])?;
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

        self.initctl(&["stop", &self.descriptor.name])?;
        Ok(outcome_line(&action, true))
    }

    fn status(&self) -> Result<String> {
        self.ensure_privileges()?;
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

fn render_job(descriptor: &ServiceDescriptor, exec_path: &Path, extra_args: &[String]) -> String {
    let mut exec = sh_arg(&exec_path.to_string_lossy());
    for arg in extra_args {
        exec.push(' ');
        exec.push_str(&sh_arg(arg));
    }

    let start_on = if descriptor.dependencies.is_empty() {
        "start on runlevel [2345]".to_string()
    } else {
        let started = descriptor
            .dependencies
            .iter()
            .map(|dep| format!("started {dep}"))
            .collect::<Vec<_>>()
            .join(" and ");
        format!("start on (runlevel [2345] and {started})")
    };

    format!(
        r#"description "{description}"

{start_on}
stop on runlevel [016]

respawn

exec {exec}
"#,
        description = descriptor.description,
        start_on = start_on,
        exec = exec,
    )
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
    fn job_renders_exec_and_dependency_conditions() {
        let desc = descriptor().with_dependencies(["mysql", "redis"]);
        let job = render_job(
            &desc,
            Path::new("/usr/local/bin/echosvc"),
            &["--verbose".to_string()],
        );

        assert!(job.contains("exec /usr/local/bin/echosvc --verbose"));
        assert!(job.contains("start on (runlevel [2345] and started mysql and started redis)"));
        assert!(job.contains("respawn"));
    }

    #[test]
    fn job_shell_quotes_arguments() {
        let job = render_job(
            &descriptor(),
            Path::new("/usr/local/bin/echosvc"),
            &["$(reboot)".to_string()],
        );
        assert!(job.contains("exec /usr/local/bin/echosvc '$(reboot)'"));
    }

    #[test]
    fn probe_parses_running_job_with_pid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echosvc.conf"), "exec /x\n").unwrap();

        let runner = ScriptedRunner::new();
        runner.respond_when(
            "initctl",
            "status",
            CommandOutput::success("echosvc start/running, process 4321\n"),
        );
        let backend = UpstartBackend::with_parts(
            descriptor(),
            dir.path().to_path_buf(),
            Box::new(runner),
            Box::new(FixedPrivileges(true)),
        );

        assert_eq!(
            backend.state().unwrap(),
            ServiceState::Running { pid: Some(4321) }
        );
    }

    #[test]
    fn probe_treats_waiting_job_as_stopped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echosvc.conf"), "exec /x\n").unwrap();

        let runner = ScriptedRunner::new();
        runner.respond_when(
            "initctl",
            "status",
            CommandOutput::success("echosvc stop/waiting\n"),
        );
        let backend = UpstartBackend::with_parts(
            descriptor(),
            dir.path().to_path_buf(),
            Box::new(runner),
            Box::new(FixedPrivileges(true)),
        );

        assert_eq!(backend.state().unwrap(), ServiceState::Stopped);
        let err = backend.stop().unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyStopped));
    }

    #[test]
    fn missing_job_file_means_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let backend = UpstartBackend::with_parts(
            descriptor(),
            dir.path().to_path_buf(),
            Box::new(runner.clone()),
            Box::new(FixedPrivileges(true)),
        );

        assert_eq!(backend.state().unwrap(), ServiceState::NotInstalled);
        let err = backend.start().unwrap_err();
        assert!(matches!(err, ServiceError::NotInstalled));
        // the probe never ran initctl for a missing job file
        assert!(runner.invocations().is_empty());
    }

    #[test]
    fn install_then_remove_round_trips_the_job_file() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new();
        runner.respond_when("initctl", "status", CommandOutput::failure(1, "unknown job"));
        let backend = UpstartBackend::with_parts(
            descriptor(),
            dir.path().to_path_buf(),
            Box::new(runner),
            Box::new(FixedPrivileges(true)),
        );

        backend.install(&[]).unwrap();
        assert!(dir.path().join("echosvc.conf").exists());

        backend.remove().unwrap();
        assert!(!dir.path().join("echosvc.conf").exists());
    }
}
