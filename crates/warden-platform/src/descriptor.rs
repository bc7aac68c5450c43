use serde::{Deserialize, Serialize};

/// Scope a service is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    /// System-wide daemon supervised by the init system.
    SystemDaemon,
    /// Service running inside the current user's session (systemd user
    /// units, launchd user agents). Not every init system has an
    /// equivalent; construction fails with `PlatformUnsupported` where the
    /// per-user service model does not exist.
    UserAgent,
    /// Agent available in every user session (launchd global agents).
    /// Init systems without the concept treat this as a system daemon.
    GlobalDaemon,
}

/// Immutable identity of a managed service.
///
/// `name` must match the executable file name the service is launched
/// from; the backends derive both the config path and the executable
/// lookup from it. That match is a caller contract, not enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub description: String,
    pub kind: ServiceKind,
    /// Other services that must be up first. Rendered into the native
    /// "requires/after" field where the config format has one; formats
    /// without the concept drop them.
    pub dependencies: Vec<String>,
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        kind: ServiceKind,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            kind,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_dependencies() {
        let desc = ServiceDescriptor::new("echosvc", "Echo", ServiceKind::SystemDaemon)
            .with_dependencies(["network.target", "syslog"]);
        assert_eq!(desc.name, "echosvc");
        assert_eq!(desc.dependencies, vec!["network.target", "syslog"]);
    }

    #[test]
    fn defaults_to_no_dependencies() {
        let desc = ServiceDescriptor::new("echosvc", "Echo", ServiceKind::UserAgent);
        assert!(desc.dependencies.is_empty());
        assert_eq!(desc.kind, ServiceKind::UserAgent);
    }
}
