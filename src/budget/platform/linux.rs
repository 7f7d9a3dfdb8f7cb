use anyhow::{Context, Result};
use std::process::Command;

use super::{SessionInfo, SessionState};

/// Username of a logind session
pub fn resolve_username(session_id: u32) -> Result<Option<String>> {
    let id = session_id.to_string();
    let name = loginctl(&["show-session", &id, "-p", "Name", "--value"])?;
    let name = name.trim();

    if name.is_empty() {
        Ok(None)
    } else {
        Ok(Some(name.to_string()))
    }
}

/// Lock a logind session
pub fn lock_session(session_id: u32) -> Result<()> {
    loginctl(&["lock-session", &session_id.to_string()]).map(|_| ())
}

/// Terminate a logind session
pub fn logoff_session(session_id: u32) -> Result<()> {
    loginctl(&["terminate-session", &session_id.to_string()]).map(|_| ())
}

/// All numeric user-class sessions known to logind
pub fn list_sessions() -> Result<Vec<SessionInfo>> {
    let listing = loginctl(&["list-sessions", "--no-legend"])?;

    let mut sessions = Vec::new();
    for session_id in parse_session_ids(&listing) {
        let id = session_id.to_string();
        // The session may end between the listing and this query
        let Ok(properties) = loginctl(&[
            "show-session",
            &id,
            "-p",
            "Class",
            "-p",
            "Active",
            "-p",
            "LockedHint",
            "-p",
            "Name",
        ]) else {
            continue;
        };

        if let Some(state) = parse_session_state(&properties) {
            sessions.push(SessionInfo {
                session_id,
                state,
                username: parse_session_name(&properties),
            });
        }
    }

    Ok(sessions)
}

/// Session ids from `loginctl list-sessions --no-legend`.
///
/// Non-numeric ids (e.g. `c1` for greeter sessions) are skipped.
fn parse_session_ids(listing: &str) -> Vec<u32> {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|id| id.parse().ok())
        .collect()
}

/// State of a session from `show-session` properties, None if not a user session
fn parse_session_state(properties: &str) -> Option<SessionState> {
    let mut class = None;
    let mut active = false;
    let mut locked = false;

    for line in properties.lines() {
        match line.split_once('=') {
            Some(("Class", value)) => class = Some(value.trim()),
            Some(("Active", value)) => active = value.trim() == "yes",
            Some(("LockedHint", value)) => locked = value.trim() == "yes",
            _ => {}
        }
    }

    if class != Some("user") {
        return None;
    }

    if active && !locked {
        Some(SessionState::Active)
    } else {
        Some(SessionState::Locked)
    }
}

fn parse_session_name(properties: &str) -> Option<String> {
    properties
        .lines()
        .find_map(|line| line.strip_prefix("Name="))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn loginctl(args: &[&str]) -> Result<String> {
    let output = Command::new("loginctl")
        .args(args)
        .output()
        .context("Failed to run loginctl")?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        anyhow::bail!(
            "loginctl {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr).trim()
        )
    }
}
