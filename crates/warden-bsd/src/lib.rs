//! FreeBSD backend: rc.d scripts, lifecycle via the `service` wrapper.

pub mod rcd;
