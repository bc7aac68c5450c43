use crate::descriptor::ServiceDescriptor;
use crate::error::Result;
use crate::state::ServiceState;

/// Uniform lifecycle contract implemented by one backend per init-system
/// family (systemd, Upstart, SysV, launchd, Windows SCM/NSSM).
///
/// Backends hold no cached status: every operation re-probes the native
/// subsystem immediately before acting, so a concurrent manual
/// `systemctl`/`sc.exe` call between two operations is always observed.
/// Precondition violations surface as the matching
/// [`ServiceError`](crate::ServiceError) variant; `PrivilegeRequired` is
/// checked first and short-circuits everything else, before any native
/// command is issued.
pub trait ServiceBackend: Send + Sync {
    /// The descriptor this backend was constructed from.
    fn descriptor(&self) -> &ServiceDescriptor;

    /// Register the service with the native subsystem. `extra_args` are
    /// appended to the executable invocation in the generated config.
    /// Requires the service to not be installed yet; leaves it installed
    /// and stopped.
    fn install(&self, extra_args: &[String]) -> Result<String>;

    /// Unregister the service and delete its config. Allowed from any run
    /// state; a running service is stopped on a best-effort basis first.
    fn remove(&self) -> Result<String>;

    /// Start an installed, stopped service.
    fn start(&self) -> Result<String>;

    /// Stop an installed, running service.
    fn stop(&self) -> Result<String>;

    /// Human-readable status line ("Service is stopped", "Service (pid N)
    /// is running..."). Callers needing machine state use [`state`].
    ///
    /// [`state`]: ServiceBackend::state
    fn status(&self) -> Result<String>;

    /// Machine-readable state, probed live from the native subsystem.
    /// Never mutates anything.
    fn state(&self) -> Result<ServiceState>;
}
