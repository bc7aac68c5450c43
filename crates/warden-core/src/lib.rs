//! The entry point callers use to obtain a lifecycle backend for the
//! host they are running on.
//!
//! ```no_run
//! use warden_core::{new_service, ServiceDescriptor, ServiceKind};
//!
//! let descriptor = ServiceDescriptor::new(
//!     "echosvc",
//!     "Echo service",
//!     ServiceKind::SystemDaemon,
//! );
//! let service = new_service(descriptor)?;
//! println!("{}", service.install(&[])?);
//! # Ok::<(), warden_core::ServiceError>(())
//! ```

use tracing::debug;

pub use warden_platform::{
    Result, ServiceBackend, ServiceDescriptor, ServiceError, ServiceKind, ServiceState,
};

/// Construct the backend matching the host platform: on Linux the init
/// system is probed at runtime (systemd, then Upstart, then SysV); on
/// macOS, FreeBSD and Windows the platform fixes the backend. On Windows
/// the `nssm` cargo feature selects NSSM over the built-in SCM.
///
/// Fails with [`ServiceError::PlatformUnsupported`] when the platform has
/// no service manager this crate knows, or when `descriptor.kind` asks
/// for a per-user service on a host without a per-user service model.
pub fn new_service(descriptor: ServiceDescriptor) -> Result<Box<dyn ServiceBackend>> {
    debug!(service = %descriptor.name, os = std::env::consts::OS, "constructing backend");

    #[cfg(target_os = "linux")]
    {
        warden_linux::new_backend(descriptor)
    }
    #[cfg(target_os = "macos")]
    {
        Ok(Box::new(warden_macos::launchd::LaunchdBackend::new(
            descriptor,
        )?))
    }
    #[cfg(target_os = "freebsd")]
    {
        if descriptor.kind == ServiceKind::UserAgent {
            return Err(ServiceError::PlatformUnsupported(
                "rc.d has no per-user service model".to_string(),
            ));
        }
        Ok(Box::new(warden_bsd::rcd::RcdBackend::new(descriptor)))
    }
    #[cfg(target_os = "windows")]
    {
        #[cfg(feature = "nssm")]
        {
            Ok(Box::new(warden_windows::nssm::NssmBackend::new(
                descriptor,
            )?))
        }
        #[cfg(not(feature = "nssm"))]
        {
            Ok(Box::new(warden_windows::scm::ScmBackend::new(descriptor)?))
        }
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "windows"
    )))]
    {
        let _ = descriptor;
        Err(ServiceError::PlatformUnsupported(format!(
            "no service manager backend for {}",
            std::env::consts::OS
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[test]
    fn backend_carries_the_descriptor() {
        let descriptor =
            ServiceDescriptor::new("echosvc", "Echo service", ServiceKind::SystemDaemon)
                .with_dependencies(["network.target"]);
        let backend = new_service(descriptor.clone()).unwrap();
        assert_eq!(backend.descriptor(), &descriptor);
    }
}
