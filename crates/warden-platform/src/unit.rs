//! Writing rendered configs to their canonical paths.

use std::path::{Path, PathBuf};

use crate::error::{Result, ServiceError};

/// A rendered native config on its way to disk: assembled during install,
/// written once, then discarded.
#[derive(Debug, Clone)]
pub struct UnitFile {
    path: PathBuf,
    contents: String,
    #[cfg_attr(not(unix), allow(dead_code))]
    mode: u32,
}

impl UnitFile {
    /// A plain config file (systemd unit, plist), mode 0644.
    pub fn new(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
            mode: 0o644,
        }
    }

    /// An init script that must be executable, mode 0755.
    pub fn executable(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            mode: 0o755,
            ..Self::new(path, contents)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the config into place. Goes through a temp file in the
    /// destination directory plus a rename, so a crash mid-write never
    /// leaves a truncated unit behind.
    pub fn write(&self) -> Result<()> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| {
                ServiceError::NativeCommand(format!("invalid config path {}", self.path.display()))
            })?
            .to_os_string();
        let mut tmp_name = file_name;
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        std::fs::write(&tmp, &self.contents).map_err(|err| {
            ServiceError::NativeCommand(format!("cannot write {}: {err}", tmp.display()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(self.mode)).map_err(
                |err| {
                    ServiceError::NativeCommand(format!(
                        "cannot set permissions on {}: {err}",
                        tmp.display()
                    ))
                },
            )?;
        }

        std::fs::rename(&tmp, &self.path).map_err(|err| {
            ServiceError::NativeCommand(format!("cannot move config into {}: {err}", self.path.display()))
        })
    }
}
