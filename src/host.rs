use std::io::IsTerminal;

use once_cell::sync::Lazy;

static ELEVATED: Lazy<bool> = Lazy::new(detect_elevated);

/// Whether the process runs with elevated privileges (root / Administrator).
/// Resolved once at startup; the safety gate uses this to tighten every tier.
pub fn is_elevated() -> bool {
    *ELEVATED
}

pub fn stdin_is_tty() -> bool {
    std::io::stdin().is_terminal()
}

#[cfg(unix)]
fn detect_elevated() -> bool {
    // Effective uid, not real uid: sudo leaves the real uid untouched.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(windows)]
fn detect_elevated() -> bool {
    use std::mem;
    use windows_sys::Win32::Foundation::{CloseHandle, HANDLE};
    use windows_sys::Win32::Security::{
        GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY,
    };
    use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

    unsafe {
        let mut token: HANDLE = std::ptr::null_mut();
        if OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) == 0 {
            return false;
        }
        let mut elevation: TOKEN_ELEVATION = mem::zeroed();
        let mut len = 0u32;
        let ok = GetTokenInformation(
            token,
            TokenElevation,
            &mut elevation as *mut _ as *mut _,
            mem::size_of::<TOKEN_ELEVATION>() as u32,
            &mut len,
        );
        CloseHandle(token);
        ok != 0 && elevation.TokenIsElevated != 0
    }
}

#[cfg(not(any(unix, windows)))]
fn detect_elevated() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elevation_is_stable_across_calls() {
        assert_eq!(is_elevated(), is_elevated());
    }
}
