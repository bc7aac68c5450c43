//! Linux backends: systemd, Upstart, and SysV init, plus the runtime
//! probe that picks between them.

pub mod systemd;
pub mod sysv;
pub mod upstart;

use std::path::Path;

use tracing::debug;

use warden_platform::{Result, ServiceBackend, ServiceDescriptor, ServiceError, ServiceKind};

/// Init-system families a Linux host can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitSystem {
    Systemd,
    Upstart,
    SysV,
}

/// Probe the host for init-system markers, most specific first: a live
/// systemd leaves `/run/systemd/system` mounted; Upstart ships
/// `/sbin/initctl`; everything else is treated as SysV init.
fn detect_init_system(root: &Path) -> InitSystem {
    if root.join("run/systemd/system").exists() {
        InitSystem::Systemd
    } else if root.join("sbin/initctl").exists() {
        InitSystem::Upstart
    } else {
        InitSystem::SysV
    }
}

/// Construct the backend matching the host's init system.
///
/// `UserAgent` descriptors are only supported under systemd; on
/// Upstart/SysV hosts they fail with `PlatformUnsupported`, because those
/// init systems have no per-user service model.
#[cfg(unix)]
pub fn new_backend(descriptor: ServiceDescriptor) -> Result<Box<dyn ServiceBackend>> {
    new_backend_at(Path::new("/"), descriptor)
}

#[cfg(unix)]
fn new_backend_at(root: &Path, descriptor: ServiceDescriptor) -> Result<Box<dyn ServiceBackend>> {
    let init = detect_init_system(root);
    debug!(?init, service = %descriptor.name, "selected init system");
    match init {
        InitSystem::Systemd => Ok(Box::new(systemd::SystemdBackend::new(descriptor)?)),
        InitSystem::Upstart | InitSystem::SysV if descriptor.kind == ServiceKind::UserAgent => {
            Err(ServiceError::PlatformUnsupported(
                "user services need systemd; this host runs a legacy init".to_string(),
            ))
        }
        InitSystem::Upstart => Ok(Box::new(upstart::UpstartBackend::new(descriptor))),
        InitSystem::SysV => Ok(Box::new(sysv::SysvBackend::new(descriptor))),
    }
}
