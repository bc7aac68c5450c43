//! systemd backend: unit files under `/etc/systemd/system` (or the user
//! unit directory for user agents), lifecycle via `systemctl`.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use warden_platform::command::{CommandOutput, CommandRunner, SystemRunner};
use warden_platform::presentation::outcome_line;
use warden_platform::privilege::{AlwaysPrivileged, PrivilegeProbe};
use warden_platform::quote::unit_arg;
use warden_platform::{
    lookup, Result, ServiceBackend, ServiceDescriptor, ServiceError, ServiceKind, ServiceState,
    UnitFile,
};

const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

pub struct SystemdBackend {
    descriptor: ServiceDescriptor,
    user_scope: bool,
    unit_dir: PathBuf,
    runner: Box<dyn CommandRunner>,
    privilege: Box<dyn PrivilegeProbe>,
}

impl SystemdBackend {
    #[cfg(unix)]
    pub fn new(descriptor: ServiceDescriptor) -> Result<Self> {
        use warden_platform::privilege::RootGroupProbe;

        match descriptor.kind {
            ServiceKind::SystemDaemon | ServiceKind::GlobalDaemon => Ok(Self::with_parts(
                descriptor,
                PathBuf::from(SYSTEM_UNIT_DIR),
                Box::new(SystemRunner),
                Box::new(RootGroupProbe),
            )),
            ServiceKind::UserAgent => {
                let base = directories::BaseDirs::new().ok_or_else(|| {
                    ServiceError::NativeCommand(
                        "cannot locate the user configuration directory".to_string(),
                    )
                })?;
                let unit_dir = base.config_dir().join("systemd/user");
                Ok(Self::with_parts(
                    descriptor,
                    unit_dir,
                    Box::new(SystemRunner),
                    Box::new(AlwaysPrivileged),
                ))
            }
        }
    }

    /// Construct with explicit seams (unit directory, runner, privilege
    /// probe). Used by tests and by embedders that relocate the unit dir.
    pub fn with_parts(
        descriptor: ServiceDescriptor,
        unit_dir: PathBuf,
        runner: Box<dyn CommandRunner>,
        privilege: Box<dyn PrivilegeProbe>,
    ) -> Self {
        let user_scope = descriptor.kind == ServiceKind::UserAgent;
        Self {
            descriptor,
            user_scope,
            unit_dir,
            runner,
            privilege,
        }
    }

    fn unit_name(&self) -> String {
        format!("{}.service", self.descriptor.name)
    }

    fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(self.unit_name())
    }

    fn ensure_privileges(&self) -> Result<()> {
        if self.privilege.has_privileges() {
            Ok(())
        } else {
            Err(ServiceError::PrivilegeRequired)
        }
    }

    /// Run `systemctl` (with `--user` in user scope) and require success.
    fn systemctl(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut full: Vec<&str> = Vec::with_capacity(args.len() + 1);
        if self.user_scope {
            full.push("--user");
        }
        full.extend_from_slice(args);

        let out = self
            .runner
            .run("systemctl", &full)
            .map_err(|err| ServiceError::NativeCommand(format!("systemctl: {err}")))?;
        if !out.success {
            return Err(ServiceError::NativeCommand(format!(
                "systemctl {} failed: {}",
                args.first().copied().unwrap_or_default(),
                out.stderr.trim()
            )));
        }
        Ok(out)
    }

    /// Live state: the unit file on disk decides installed-ness, the
    /// `systemctl show` properties decide the run state. A failing probe
    /// command degrades to "stopped" so start/stop stay decidable.
    fn probe(&self) -> ServiceState {
        if !self.unit_path().exists() {
            return ServiceState::NotInstalled;
        }

        let unit = self.unit_name();
        let mut args: Vec<&str> = Vec::new();
        if self.user_scope {
            args.push("--user");
        }
        args.extend_from_slice(&["show", "-p", "ActiveState", "-p", "MainPID", &unit]);

        let out = match self.runner.run("systemctl", &args) {
            Ok(out) => out,
            Err(err) => {
                debug!(service = %self.descriptor.name, %err, "status probe failed, assuming stopped");
                return ServiceState::Stopped;
            }
        };
        if !out.success {
            return ServiceState::Stopped;
        }

        let mut active = false;
        let mut pid = None;
        for line in out.stdout.lines() {
            if let Some(value) = line.strip_prefix("ActiveState=") {
                active = matches!(value.trim(), "active" | "activating" | "reloading");
            } else if let Some(value) = line.strip_prefix("MainPID=") {
                pid = value.trim().parse::<u32>().ok().filter(|p| *p > 0);
            }
        }

        if active {
            ServiceState::Running { pid }
        } else {
            ServiceState::Stopped
        }
    }
}

impl ServiceBackend for SystemdBackend {
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
        let unit = render_unit(&self.descriptor, self.user_scope, &exec_path, extra_args);

        std::fs::create_dir_all(&self.unit_dir).map_err(|err| {
            ServiceError::NativeCommand(format!(
                "cannot create {}: {err}",
                self.unit_dir.display()
            ))
        })?;
        UnitFile::new(self.unit_path(), unit).write()?;

        self.systemctl(&["daemon-reload"])?;
        self.systemctl(&["enable", &self.unit_name()])?;

        info!(unit = %self.unit_path().display(), "installed systemd unit");
        Ok(outcome_line(&action, true))
    }

    fn remove(&self) -> Result<String> {
        let action = format!("Removing {}:", self.descriptor.description);
        self.ensure_privileges()?;
        let state = self.probe();
        if !state.is_installed() {
            return Err(ServiceError::NotInstalled);
        }

        let unit = self.unit_name();
        if state.is_running() {
            let _ = self.systemctl(&["stop", &unit]);
        }
        let _ = self.systemctl(&["disable", &unit]);

        std::fs::remove_file(self.unit_path()).map_err(|err| {
            ServiceError::NativeCommand(format!(
                "cannot remove {}: {err}",
                self.unit_path().display()
            ))
        })?;
        let _ = self.systemctl(&["daemon-reload"]);

        info!(unit = %self.unit_path().display(), "removed systemd unit");
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

        self.systemctl(&["start", &self.unit_name()])?;
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

        self.systemctl(&["stop", &self.unit_name()])?;
        Ok(outcome_line(&action, true))
    }

    fn status(&self) -> Result<String> {
        // System units need privileges to query, matching the native
        // tooling; user units are always queryable by their owner.
        if !self.user_scope {
            self.ensure_privileges()?;
        }
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

fn render_unit(
    descriptor: &ServiceDescriptor,
    user_scope: bool,
    exec_path: &Path,
    extra_args: &[String],
) -> String {
    let mut exec_start = unit_arg(&exec_path.to_string_lossy());
    for arg in extra_args {
        exec_start.push(' ');
        exec_start.push_str(&unit_arg(arg));
    }

    let mut after = String::from("network.target");
    for dep in &descriptor.dependencies {
        after.push(' ');
        after.push_str(dep);
    }
    let requires = if descriptor.dependencies.is_empty() {
        String::new()
    } else {
        format!("Requires={}\n", descriptor.dependencies.join(" "))
    };

    let wanted_by = if user_scope {
        "default.target"
    } else {
        "multi-user.target"
    };

    format!(
        r#"[Unit]
Description={description}
After={after}
{requires}
[Service]
Type=simple
ExecStart={exec_start}
Restart=on-failure
RestartSec=5

[Install]
WantedBy={wanted_by}
"#,
        description = descriptor.description,
        after = after,
        requires = requires,
        exec_start = exec_start,
        wanted_by = wanted_by,
    )
}
