//! Privilege probing.
//!
//! Mutating service state needs administrative rights on every platform.
//! A probe never fails: anything that prevents the check is logged and
//! reported as "no privileges".

/// Answers whether the current process may mutate system service state.
pub trait PrivilegeProbe: Send + Sync {
    fn has_privileges(&self) -> bool;
}

/// POSIX probe: administrative means the effective group id maps to the
/// root group (gid 0).
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RootGroupProbe;

#[cfg(unix)]
impl PrivilegeProbe for RootGroupProbe {
    fn has_privileges(&self) -> bool {
        nix::unistd::Gid::effective().as_raw() == 0
    }
}

/// Probe for user-scope services: they live in the caller's own config
/// directory and need no elevation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysPrivileged;

impl PrivilegeProbe for AlwaysPrivileged {
    fn has_privileges(&self) -> bool {
        true
    }
}
