//! rc.d backend for FreeBSD.
//!
//! The generated script delegates supervision to `/usr/sbin/daemon`,
//! which writes the pidfile `rc.subr`'s status verb reports on.

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

const RCD_DIR: &str = "/usr/local/etc/rc.d";

pub struct RcdBackend {
    descriptor: ServiceDescriptor,
    rcd_dir: PathBuf,
    runner: Box<dyn CommandRunner>,
    privilege: Box<dyn PrivilegeProbe>,
    /// Matches rc.subr status output, `echosvc is running as pid 4321.`
    pid_re: Regex,
}

impl RcdBackend {
    #[cfg(unix)]
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        use warden_platform::privilege::RootGroupProbe;

        Self::with_parts(
            descriptor,
            PathBuf::from(RCD_DIR),
            Box::new(SystemRunner),
            Box::new(RootGroupProbe),
        )
    }

    /// Construct with explicit seams; used by tests.
    pub fn with_parts(
        descriptor: ServiceDescriptor,
        rcd_dir: PathBuf,
        runner: Box<dyn CommandRunner>,
        privilege: Box<dyn PrivilegeProbe>,
    ) -> Self {
        Self {
            descriptor,
            rcd_dir,
            runner,
            privilege,
            pid_re: Regex::new(r"pid (\d+)").expect("invalid rc.d status regex"),
        }
    }

    fn script_path(&self) -> PathBuf {
        self.rcd_dir.join(&self.descriptor.name)
    }

    fn ensure_privileges(&self) -> Result<()> {
        if self.privilege.has_privileges() {
            Ok(())
        } else {
            Err(ServiceError::PrivilegeRequired)
        }
    }

    fn service(&self, verb: &str) -> Result<CommandOutput> {
        let out = self
            .runner
            .run("service", &[&self.descriptor.name, verb])
            .map_err(|err| ServiceError::NativeCommand(format!("service: {err}")))?;
        if !out.success {
            return Err(ServiceError::NativeCommand(format!(
                "service {} {verb} failed: {}",
                self.descriptor.name,
                out.stderr.trim()
            )));
        }
        Ok(out)
    }

    fn probe(&self) -> ServiceState {
        if !self.script_path().exists() {
            return ServiceState::NotInstalled;
        }

        let out = match self
            .runner
            .run("service", &[&self.descriptor.name, "status"])
        {
            Ok(out) => out,
            Err(err) => {
                debug!(service = %self.descriptor.name, %err, "status probe failed, assuming stopped");
                return ServiceState::Stopped;
            }
        };
        // rc.subr exits 1 for "is not running", which is a valid answer
        if !out.success || !out.stdout.contains("is running") {
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

impl ServiceBackend for RcdBackend {
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
        let script = render_script(&self.descriptor, &exec_path, extra_args);
        UnitFile::executable(self.script_path(), script).write()?;

        info!(script = %self.script_path().display(), "installed rc.d script");
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
            let _ = self.service("stop");
        }
        std::fs::remove_file(self.script_path()).map_err(|err| {
            ServiceError::NativeCommand(format!(
                "cannot remove {}: {err}",
                self.script_path().display()
            ))
        })?;

        info!(script = %self.script_path().display(), "removed rc.d script");
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

        self.service("start")?;
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

        self.service("stop")?;
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

fn render_script(
    descriptor: &ServiceDescriptor,
    exec_path: &Path,
    extra_args: &[String],
) -> String {
    let mut args = String::new();
    for arg in extra_args {
        args.push(' ');
        args.push_str(&sh_arg(arg));
    }

    let mut require = String::from("networking syslog");
    for dep in &descriptor.dependencies {
        require.push(' ');
        require.push_str(dep);
    }

    format!(
        r#"#!/bin/sh
#
# PROVIDE: {name}
# REQUIRE: {require}
# KEYWORD:

# Add the following lines to /etc/rc.conf to enable the {name}:
#
# {name}_enable="YES"
#

. /etc/rc.subr

name="{name}"
rcvar="{name}_enable"
command="{command}"
pidfile="/var/run/${{name}}.pid"

start_cmd="/usr/sbin/daemon -p ${{pidfile}} -f ${{command}}{args}"

load_rc_config $name
run_rc_command "$1"
"#,
        name = descriptor.name,
        require = require,
        command = exec_path.display(),
        args = args,
    )
}
