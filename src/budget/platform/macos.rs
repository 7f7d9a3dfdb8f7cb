use anyhow::{Context, Result};
use std::process::Command;

use super::{SessionInfo, SessionState};

/// macOS has a single console session; it is reported with this id
pub const CONSOLE_SESSION_ID: u32 = 0;

/// Owner of the console, the only session we can observe
pub fn resolve_username(session_id: u32) -> Result<Option<String>> {
    if session_id != CONSOLE_SESSION_ID {
        return Ok(None);
    }

    let output = Command::new("stat")
        .args(["-f", "%Su", "/dev/console"])
        .output()
        .context("Failed to query console owner")?;

    let user = String::from_utf8_lossy(&output.stdout).trim().to_string();
    // loginwindow owns the console as root while nobody is logged in
    if user.is_empty() || user == "root" {
        Ok(None)
    } else {
        Ok(Some(user))
    }
}

/// Lock the console session
pub fn lock_session(_session_id: u32) -> Result<()> {
    osascript("tell application \"System Events\" to keystroke \"q\" using {command down, control down}")
}

/// Log out the console user
pub fn logoff_session(_session_id: u32) -> Result<()> {
    osascript("tell application \"System Events\" to log out")
}

/// The console session, if a user owns it.
///
/// The lock state is not observable here, so the session is always reported
/// as active.
pub fn list_sessions() -> Result<Vec<SessionInfo>> {
    Ok(resolve_username(CONSOLE_SESSION_ID)?
        .map(|user| SessionInfo {
            session_id: CONSOLE_SESSION_ID,
            state: SessionState::Active,
            username: Some(user),
        })
        .into_iter()
        .collect())
}

fn osascript(script: &str) -> Result<()> {
    let output = Command::new("osascript")
        .arg("-e")
        .arg(script)
        .output()
        .context("Failed to run osascript")?;

    if output.status.success() {
        Ok(())
    } else {
        anyhow::bail!(
            "osascript failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )
    }
}
