//! launchd backend.
//!
//! launchd has no unit-level dependency field, so descriptor dependencies
//! are dropped here; ordering between launchd jobs is launchd's own
//! keepalive/demand machinery.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};

use warden_platform::command::{CommandOutput, CommandRunner, SystemRunner};
use warden_platform::presentation::outcome_line;
use warden_platform::privilege::{AlwaysPrivileged, PrivilegeProbe};
use warden_platform::quote::xml_text;
use warden_platform::{
    lookup, Result, ServiceBackend, ServiceDescriptor, ServiceError, ServiceKind, ServiceState,
    UnitFile,
};

const DAEMON_DIR: &str = "/Library/LaunchDaemons";
const GLOBAL_AGENT_DIR: &str = "/Library/LaunchAgents";

pub struct LaunchdBackend {
    descriptor: ServiceDescriptor,
    user_scope: bool,
    plist_dir: PathBuf,
    runner: Box<dyn CommandRunner>,
    privilege: Box<dyn PrivilegeProbe>,
    /// Matches the `"PID" = 4321;` entry in `launchctl list <label>` output.
    pid_re: Regex,
}

impl LaunchdBackend {
    #[cfg(unix)]
    pub fn new(descriptor: ServiceDescriptor) -> Result<Self> {
        use warden_platform::privilege::RootGroupProbe;

        let (plist_dir, privilege): (PathBuf, Box<dyn PrivilegeProbe>) = match descriptor.kind {
            ServiceKind::SystemDaemon => {
                (PathBuf::from(DAEMON_DIR), Box::new(RootGroupProbe))
            }
            ServiceKind::GlobalDaemon => {
                (PathBuf::from(GLOBAL_AGENT_DIR), Box::new(RootGroupProbe))
            }
            ServiceKind::UserAgent => {
                let base = directories::BaseDirs::new().ok_or_else(|| {
                    ServiceError::NativeCommand("cannot locate the home directory".to_string())
                })?;
                (
                    base.home_dir().join("Library/LaunchAgents"),
                    Box::new(AlwaysPrivileged),
                )
            }
        };
        Ok(Self::with_parts(
            descriptor,
            plist_dir,
            Box::new(SystemRunner),
            privilege,
        ))
    }

    /// Construct with explicit seams; used by tests.
    pub fn with_parts(
        descriptor: ServiceDescriptor,
        plist_dir: PathBuf,
        runner: Box<dyn CommandRunner>,
        privilege: Box<dyn PrivilegeProbe>,
    ) -> Self {
        let user_scope = descriptor.kind == ServiceKind::UserAgent;
        Self {
            descriptor,
            user_scope,
            plist_dir,
            runner,
            privilege,
            pid_re: Regex::new(r#""PID" = (\d+);"#).expect("invalid launchctl list regex"),
        }
    }

    fn plist_path(&self) -> PathBuf {
        self.plist_dir.join(format!("{}.plist", self.descriptor.name))
    }

    fn ensure_privileges(&self) -> Result<()> {
        if self.privilege.has_privileges() {
            Ok(())
        } else {
            Err(ServiceError::PrivilegeRequired)
        }
    }

    fn launchctl(&self, args: &[&str]) -> Result<CommandOutput> {
        let out = self
            .runner
            .run("launchctl", args)
            .map_err(|err| ServiceError::NativeCommand(format!("launchctl: {err}")))?;
        if !out.success {
            return Err(ServiceError::NativeCommand(format!(
                "launchctl {} failed: {}",
                args.first().copied().unwrap_or_default(),
                out.stderr.trim()
            )));
        }
        Ok(out)
    }

    fn probe(&self) -> ServiceState {
        if !self.plist_path().exists() {
            return ServiceState::NotInstalled;
        }

        let out = match self
            .runner
            .run("launchctl", &["list", &self.descriptor.name])
        {
            Ok(out) => out,
            Err(err) => {
                debug!(service = %self.descriptor.name, %err, "status probe failed, assuming stopped");
                return ServiceState::Stopped;
            }
        };
        // `launchctl list <label>` exits nonzero for unloaded jobs
        if !out.success || !out.stdout.contains(&self.descriptor.name) {
            return ServiceState::Stopped;
        }

        let pid = self
            .pid_re
            .captures(&out.stdout)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        ServiceState::Running { pid }
    }
}

impl ServiceBackend for LaunchdBackend {
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
        let plist = render_plist(&self.descriptor, &exec_path, extra_args);

        std::fs::create_dir_all(&self.plist_dir).map_err(|err| {
            ServiceError::NativeCommand(format!(
                "cannot create {}: {err}",
                self.plist_dir.display()
            ))
        })?;
        UnitFile::new(self.plist_path(), plist).write()?;

        info!(plist = %self.plist_path().display(), "installed launchd property list");
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
            let plist = self.plist_path();
            let _ = self.launchctl(&["unload", &plist.to_string_lossy()]);
        }
        std::fs::remove_file(self.plist_path()).map_err(|err| {
            ServiceError::NativeCommand(format!(
                "cannot remove {}: {err}",
                self.plist_path().display()
            ))
        })?;

        info!(plist = %self.plist_path().display(), "removed launchd property list");
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

        let plist = self.plist_path();
        self.launchctl(&["load", &plist.to_string_lossy()])?;
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

        let plist = self.plist_path();
        self.launchctl(&["unload", &plist.to_string_lossy()])?;
        Ok(outcome_line(&action, true))
    }

    fn status(&self) -> Result<String> {
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

fn render_plist(descriptor: &ServiceDescriptor, exec_path: &Path, extra_args: &[String]) -> String {
    let mut program_args = format!(
        "\t\t<string>{}</string>\n",
        xml_text(&exec_path.to_string_lossy())
    );
    for arg in extra_args {
        program_args.push_str(&format!("\t\t<string>{}</string>\n", xml_text(arg)));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>KeepAlive</key>
	<true/>
	<key>Label</key>
	<string>{name}</string>
	<key>ProgramArguments</key>
	<array>
{program_args}	</array>
	<key>RunAtLoad</key>
	<true/>
	<key>WorkingDirectory</key>
	<string>/usr/local/var</string>
	<key>StandardErrorPath</key>
	<string>/usr/local/var/log/{name}.err</string>
	<key>StandardOutPath</key>
	<string>/usr/local/var/log/{name}.log</string>
</dict>
</plist>
"#,
        name = xml_text(&descriptor.name),
        program_args = program_args,
    )
}
