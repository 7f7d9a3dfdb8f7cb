use anyhow::Result;

use super::{SessionInfo, SessionState};

use windows_sys::Win32::System::RemoteDesktop::{
    WTSActive, WTSDisconnectSession, WTSEnumerateSessionsW, WTSFreeMemory, WTSLogoffSession,
    WTSQuerySessionInformationW, WTSUserName, WTS_CURRENT_SERVER_HANDLE, WTS_SESSION_INFOW,
};

/// Session 0 hosts services and never has an interactive user
const SERVICES_SESSION_ID: u32 = 0;

/// Username of a Terminal Services session
pub fn resolve_username(session_id: u32) -> Result<Option<String>> {
    let mut buffer: *mut u16 = std::ptr::null_mut();
    let mut bytes: u32 = 0;

    // SAFETY: on success the API hands us a NUL-terminated UTF-16 buffer that
    // we release with WTSFreeMemory.
    let name = unsafe {
        let ok = WTSQuerySessionInformationW(
            WTS_CURRENT_SERVER_HANDLE,
            session_id,
            WTSUserName,
            &mut buffer,
            &mut bytes,
        );
        if ok == 0 || buffer.is_null() {
            anyhow::bail!(
                "WTSQuerySessionInformationW failed for session {}: {}",
                session_id,
                std::io::Error::last_os_error()
            );
        }

        let units = (bytes as usize) / std::mem::size_of::<u16>();
        let slice = std::slice::from_raw_parts(buffer, units);
        let len = slice.iter().position(|&c| c == 0).unwrap_or(units);
        let name = String::from_utf16_lossy(&slice[..len]);
        WTSFreeMemory(buffer.cast());
        name
    };

    if name.is_empty() {
        Ok(None)
    } else {
        Ok(Some(name))
    }
}

/// Disconnect the session, which drops it back to the lock screen
pub fn lock_session(session_id: u32) -> Result<()> {
    // SAFETY: plain FFI call with a server handle constant
    let ok = unsafe { WTSDisconnectSession(WTS_CURRENT_SERVER_HANDLE, session_id, 0) };
    if ok == 0 {
        anyhow::bail!(
            "WTSDisconnectSession failed for session {}: {}",
            session_id,
            std::io::Error::last_os_error()
        );
    }
    Ok(())
}

/// Log the session off without waiting for it to finish
pub fn logoff_session(session_id: u32) -> Result<()> {
    // SAFETY: plain FFI call with a server handle constant
    let ok = unsafe { WTSLogoffSession(WTS_CURRENT_SERVER_HANDLE, session_id, 0) };
    if ok == 0 {
        anyhow::bail!(
            "WTSLogoffSession failed for session {}: {}",
            session_id,
            std::io::Error::last_os_error()
        );
    }
    Ok(())
}

/// Interactive sessions on this machine.
///
/// Session enumeration cannot see the workstation lock, so only
/// connected/disconnected is observable: any state other than `WTSActive`
/// is reported as locked.
pub fn list_sessions() -> Result<Vec<SessionInfo>> {
    let mut info: *mut WTS_SESSION_INFOW = std::ptr::null_mut();
    let mut count: u32 = 0;

    // SAFETY: the API allocates `count` entries at `info`; we copy what we
    // need and release the block with WTSFreeMemory.
    let sessions = unsafe {
        let ok = WTSEnumerateSessionsW(WTS_CURRENT_SERVER_HANDLE, 0, 1, &mut info, &mut count);
        if ok == 0 || info.is_null() {
            anyhow::bail!(
                "WTSEnumerateSessionsW failed: {}",
                std::io::Error::last_os_error()
            );
        }

        let entries = std::slice::from_raw_parts(info, count as usize);
        let sessions: Vec<SessionInfo> = entries
            .iter()
            .filter(|entry| entry.SessionId != SERVICES_SESSION_ID)
            .map(|entry| SessionInfo {
                session_id: entry.SessionId,
                state: if entry.State == WTSActive {
                    SessionState::Active
                } else {
                    SessionState::Locked
                },
                username: None,
            })
            .collect();
        WTSFreeMemory(info.cast());
        sessions
    };

    // Listener and idle slots have no user behind them
    Ok(sessions
        .into_iter()
        .filter_map(|s| match resolve_username(s.session_id) {
            Ok(Some(user)) => Some(SessionInfo {
                username: Some(user),
                ..s
            }),
            _ => None,
        })
        .collect())
}
