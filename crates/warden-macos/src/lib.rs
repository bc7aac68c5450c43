//! macOS backend: launchd property lists, lifecycle via `launchctl`.

pub mod launchd;
