use thiserror::Error;

/// Every backend operation fails with exactly one of these values; native
/// tool failures carry their detail in `NativeCommand` instead of leaking
/// exit codes or io errors to the caller.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("you must have root/administrator privileges; possibly using 'sudo' should help")]
    PrivilegeRequired,

    #[error("service has already been installed")]
    AlreadyInstalled,

    #[error("service is not installed")]
    NotInstalled,

    #[error("service is already running")]
    AlreadyRunning,

    #[error("service has already been stopped")]
    AlreadyStopped,

    #[error("native command failed: {0}")]
    NativeCommand(String),

    #[error("not supported on this platform: {0}")]
    PlatformUnsupported(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::NativeCommand(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_into_native_command() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "systemctl not found");
        let err = ServiceError::from(io);
        assert!(matches!(err, ServiceError::NativeCommand(_)));
        assert!(err.to_string().contains("systemctl not found"));
    }
}
