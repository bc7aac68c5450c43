use serde::{Deserialize, Serialize};

/// Live state of a service, derived from the native subsystem on every
/// probe. Never cached: the native state can change out-of-band (manual
/// `systemctl` calls, crashes) between any two calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    /// No config/unit registered with the native subsystem.
    NotInstalled,
    /// Registered but not running.
    Stopped,
    /// Registered and running; pid where the native tool surfaces one.
    Running { pid: Option<u32> },
}

impl ServiceState {
    pub fn is_installed(&self) -> bool {
        !matches!(self, ServiceState::NotInstalled)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running { .. })
    }

    /// The human-readable status line reported by `status()`.
    pub fn status_line(&self) -> String {
        match self {
            ServiceState::NotInstalled => "Service is not installed".to_string(),
            ServiceState::Stopped => "Service is stopped".to_string(),
            ServiceState::Running { pid: Some(pid) } => {
                format!("Service (pid {pid}) is running...")
            }
            ServiceState::Running { pid: None } => "Service is running...".to_string(),
        }
    }
}
