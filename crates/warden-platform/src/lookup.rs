//! Executable resolution for generated configs.

use std::path::PathBuf;

use crate::error::{Result, ServiceError};

/// Resolve the executable a service config should launch: a matching name
/// on the search path wins; otherwise the running process image. The
/// search-path hit is re-checked on disk because PATH entries can be
/// stale.
pub fn executable_path(name: &str) -> Result<PathBuf> {
    if let Ok(path) = which::which(name) {
        if path.exists() {
            return Ok(path);
        }
    }
    tracing::debug!(name, "no match on the search path, using the process image");
    self_exe_path()
}

/// Path of the current process image.
pub fn self_exe_path() -> Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_link("/proc/self/exe").map_err(|err| {
            ServiceError::NativeCommand(format!("cannot resolve /proc/self/exe: {err}"))
        })
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::current_exe().map_err(|err| {
            ServiceError::NativeCommand(format!("cannot resolve current executable: {err}"))
        })
    }
}
