//! Elevation probing for Windows.

#[cfg(target_os = "windows")]
use warden_platform::privilege::PrivilegeProbe;

/// Administrative means the process token is elevated (UAC). A failed
/// token query reports "not elevated" rather than erroring.
#[cfg(target_os = "windows")]
#[derive(Debug, Clone, Copy, Default)]
pub struct ElevationProbe;

#[cfg(target_os = "windows")]
impl PrivilegeProbe for ElevationProbe {
    fn has_privileges(&self) -> bool {
        use windows::Win32::Foundation::{CloseHandle, HANDLE};
        use windows::Win32::Security::{
            GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
        };
        use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

        unsafe {
            let mut token = HANDLE::default();
            if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token).is_err() {
                tracing::warn!("OpenProcessToken failed, treating as unprivileged");
                return false;
            }

            let mut elevation = TOKEN_ELEVATION::default();
            let mut ret_len = 0u32;
            let size = std::mem::size_of::<TOKEN_ELEVATION>() as u32;
            let ok = GetTokenInformation(
                token,
                TokenElevation,
                Some(&mut elevation as *mut _ as *mut _),
                size,
                &mut ret_len,
            );
            let _ = CloseHandle(token);
            if ok.is_err() {
                tracing::warn!("GetTokenInformation failed, treating as unprivileged");
                return false;
            }
            elevation.TokenIsElevated != 0
        }
    }
}
