//! Windows backends.
//!
//! Windows has two mutually exclusive facilities: the built-in Service
//! Control Manager driven through `sc.exe`, and the third-party NSSM
//! wrapper, which exists to supervise executables that are not
//! SCM-aware. Both implement the same contract; picking one is a
//! build/deployment decision, not a runtime probe.

pub mod nssm;
pub mod privilege;
pub mod scm;
