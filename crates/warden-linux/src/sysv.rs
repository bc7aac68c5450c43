//! SysV backend: LSB init script under `/etc/init.d`, lifecycle via the
//! `service` wrapper.

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

const INIT_DIR: &str = "/etc/init.d";

pub struct SysvBackend {
    descriptor: ServiceDescriptor,
    init_dir: PathBuf,
    runner: Box<dyn CommandRunner>,
    privilege: Box<dyn PrivilegeProbe>,
    /// Matches the script's own status output, `... is running (pid 4321)`.
    pid_re: Regex,
}

impl SysvBackend {
    #[cfg(unix)]
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        use warden_platform::privilege::RootGroupProbe;

        Self::with_parts(
            descriptor,
            PathBuf::from(INIT_DIR),
            Box::new(SystemRunner),
            Box::new(RootGroupProbe),
        )
    }

    /// Construct with explicit seams; used by tests.
    pub fn with_parts(
        descriptor: ServiceDescriptor,
        init_dir: PathBuf,
        runner: Box<dyn CommandRunner>,
        privilege: Box<dyn PrivilegeProbe>,
    ) -> Self {
        Self {
            descriptor,
            init_dir,
            runner,
            privilege,
            pid_re: Regex::new(r"is running \(pid (\d+)\)").expect("invalid sysv status regex"),
        }
    }

    fn script_path(&self) -> PathBuf {
        self.init_dir.join(&self.descriptor.name)
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
        // init scripts exit nonzero to mean "not running"
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

impl ServiceBackend for SysvBackend {
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

        info!(script = %self.script_path().display(), "installed init script");
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

        info!(script = %self.script_path().display(), "removed init script");
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

/// The generated script's `status` verb prints the exact lines the probe
/// parses; the two sides of that contract live in this module.
fn render_script(
    descriptor: &ServiceDescriptor,
    exec_path: &Path,
    extra_args: &[String],
) -> String {
    let mut daemon_args = String::new();
    for arg in extra_args {
        daemon_args.push(' ');
        daemon_args.push_str(&sh_arg(arg));
    }

    let mut required = String::from("$local_fs $network");
    for dep in &descriptor.dependencies {
        required.push(' ');
        required.push_str(dep);
    }

    format!(
        r#"#!/bin/sh
### BEGIN INIT INFO
# Provides:          {name}
# Required-Start:    {required}
# Required-Stop:     {required}
# Default-Start:     2 3 4 5
# Default-Stop:      0 1 6
# Short-Description: {description}
### END INIT INFO

NAME={name}
DAEMON={daemon}
PIDFILE=/var/run/{name}.pid

running() {{
    [ -f "$PIDFILE" ] && kill -0 "$(cat "$PIDFILE")" 2>/dev/null
}}

case "$1" in
  start)
    if running; then
        echo "$NAME is already running"
        exit 0
    fi
    echo "Starting $NAME"
    start-stop-daemon --start --background --make-pidfile --pidfile "$PIDFILE" \
        --exec "$DAEMON" --{daemon_args}
    ;;
  stop)
    if ! running; then
        echo "$NAME is not running"
        exit 0
    fi
    echo "Stopping $NAME"
    start-stop-daemon --stop --pidfile "$PIDFILE"
    rm -f "$PIDFILE"
    ;;
  status)
    if running; then
        echo "$NAME is running (pid $(cat "$PIDFILE"))"
    else
        echo "$NAME is stopped"
        exit 3
    fi
    ;;
  restart)
    "$0" stop
    "$0" start
    ;;
  *)
    echo "Usage: $0 {{start|stop|status|restart}}"
    exit 1
    ;;
esac
"#,
        name = descriptor.name,
        description = descriptor.description,
        daemon = sh_arg(&exec_path.to_string_lossy()),
        required = required,
        daemon_args = daemon_args,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_platform::testing::{FixedPrivileges, ScriptedRunner};
    use warden_platform::ServiceKind;

    fn descriptor() -> ServiceDescriptor {
        ServiceDescriptor::new("echosvc", "Echo service", ServiceKind::SystemDaemon)
    }

    fn backend_in(dir: &Path, runner: ScriptedRunner) -> SysvBackend {
        SysvBackend::with_parts(
            descriptor(),
            dir.to_path_buf(),
            Box::new(runner),
            Box::new(FixedPrivileges(true)),
        )
    }

    #[test]
    fn script_carries_lsb_header_and_dependencies() {
        let desc = descriptor().with_dependencies(["mysql"]);
        let script = render_script(&desc, Path::new("/usr/local/bin/echosvc"), &[]);

        assert!(script.starts_with("#!/bin/sh"));
        assert!(script.contains("# Provides:          echosvc"));
        assert!(script.contains("# Required-Start:    $local_fs $network mysql"));
        assert!(script.contains("DAEMON=/usr/local/bin/echosvc"));
    }

    #[test]
    fn script_quotes_extra_arguments() {
        let script = render_script(
            &descriptor(),
            Path::new("/usr/local/bin/echosvc"),
            &["--greeting".to_string(), "hello world".to_string()],
        );
        assert!(script.contains("--exec \"$DAEMON\" -- --greeting 'hello world'"));
    }

    #[test]
    fn script_status_lines_match_the_probe() {
        // the probe looks for these exact tokens in `service status` output
        let script = render_script(&descriptor(), Path::new("/x"), &[]);
        assert!(script.contains(r#"echo "$NAME is running (pid $(cat "$PIDFILE"))""#));
        assert!(script.contains(r#"echo "$NAME is stopped""#));
    }

    #[test]
    fn install_writes_an_executable_script() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_in(dir.path(), ScriptedRunner::new());

        backend.install(&[]).unwrap();

        let path = dir.path().join("echosvc");
        assert!(path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn probe_reads_pid_from_status_output() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echosvc"), "#!/bin/sh\n").unwrap();

        let runner = ScriptedRunner::new();
        runner.respond_when(
            "service",
            "status",
            CommandOutput::success("echosvc is running (pid 7777)\n"),
        );
        let backend = backend_in(dir.path(), runner);

        assert_eq!(
            backend.state().unwrap(),
            ServiceState::Running { pid: Some(7777) }
        );
        assert_eq!(backend.status().unwrap(), "Service (pid 7777) is running...");
    }

    #[test]
    fn nonzero_status_exit_is_stopped_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echosvc"), "#!/bin/sh\n").unwrap();

        let runner = ScriptedRunner::new();
        runner.respond_when("service", "status", CommandOutput::failure(3, ""));
        let backend = backend_in(dir.path(), runner);

        assert_eq!(backend.state().unwrap(), ServiceState::Stopped);
    }

    #[test]
    fn start_goes_through_the_service_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("echosvc"), "#!/bin/sh\n").unwrap();

        let runner = std::sync::Arc::new(ScriptedRunner::new());
        runner.respond_when("service", "status", CommandOutput::failure(3, ""));
        let backend = SysvBackend::with_parts(
            descriptor(),
            dir.path().to_path_buf(),
            Box::new(runner.clone()),
            Box::new(FixedPrivileges(true)),
        );

        backend.start().unwrap();
        let last = runner.invocations().pop().unwrap();
        assert_eq!(last.program, "service");
        assert_eq!(last.args, vec!["echosvc", "start"]);
    }
}
