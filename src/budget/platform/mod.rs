/// Platform-specific session primitives

#[cfg(target_os = "windows")]
pub mod windows;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "linux")]
pub mod linux;

use anyhow::Result;
use tracing::{debug, warn};

use crate::budget::config::TerminationStrategy;

/// Account name the OS reports for sessions that belong to no interactive user
pub const SYSTEM_ACCOUNT: &str = "SYSTEM";

/// Whether a session's user is currently at the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Locked,
}

/// One entry of the OS session list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: u32,
    pub state: SessionState,
    /// Account logged in to the session, when the listing reports it
    pub username: Option<String>,
}

/// Resolves sessions to users and ends sessions.
///
/// Implementations are thin wrappers around native calls and must tolerate
/// being asked to end a session that is already gone.
pub trait SessionTerminator: Send + Sync {
    /// Username owning the session, or None for sessions without a user
    fn resolve_username(&self, session_id: u32) -> Result<Option<String>>;

    fn lock_session(&self, session_id: u32) -> Result<()>;

    fn logoff_session(&self, session_id: u32) -> Result<()>;

    /// End the session using `strategy`. Returns whether it worked.
    fn terminate(&self, session_id: u32, strategy: TerminationStrategy) -> bool {
        match strategy {
            TerminationStrategy::Lock => report(session_id, "lock", self.lock_session(session_id)),
            TerminationStrategy::Logoff => {
                report(session_id, "logoff", self.logoff_session(session_id))
            }
            TerminationStrategy::LockThenLogoff => {
                if report(session_id, "lock", self.lock_session(session_id)) {
                    return true;
                }
                debug!("Lock failed for session {}, trying logoff", session_id);
                report(session_id, "logoff", self.logoff_session(session_id))
            }
        }
    }
}

fn report(session_id: u32, action: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to {} session {}: {:#}", action, session_id, e);
            false
        }
    }
}

/// Enumerates interactive sessions (used by the session watcher)
pub trait SessionLister: Send + Sync {
    fn list_sessions(&self) -> Result<Vec<SessionInfo>>;
}

/// Session primitives of the operating system we are running on
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSessions;

impl SessionTerminator for NativeSessions {
    fn resolve_username(&self, session_id: u32) -> Result<Option<String>> {
        #[cfg(target_os = "windows")]
        {
            windows::resolve_username(session_id)
        }

        #[cfg(target_os = "macos")]
        {
            macos::resolve_username(session_id)
        }

        #[cfg(target_os = "linux")]
        {
            linux::resolve_username(session_id)
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            anyhow::bail!("Unsupported operating system for session lookup (session {})", session_id)
        }
    }

    fn lock_session(&self, session_id: u32) -> Result<()> {
        #[cfg(target_os = "windows")]
        {
            windows::lock_session(session_id)
        }

        #[cfg(target_os = "macos")]
        {
            macos::lock_session(session_id)
        }

        #[cfg(target_os = "linux")]
        {
            linux::lock_session(session_id)
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            anyhow::bail!("Unsupported operating system for session locking (session {})", session_id)
        }
    }

    fn logoff_session(&self, session_id: u32) -> Result<()> {
        #[cfg(target_os = "windows")]
        {
            windows::logoff_session(session_id)
        }

        #[cfg(target_os = "macos")]
        {
            macos::logoff_session(session_id)
        }

        #[cfg(target_os = "linux")]
        {
            linux::logoff_session(session_id)
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            anyhow::bail!("Unsupported operating system for session logoff (session {})", session_id)
        }
    }
}

impl SessionLister for NativeSessions {
    fn list_sessions(&self) -> Result<Vec<SessionInfo>> {
        #[cfg(target_os = "windows")]
        {
            windows::list_sessions()
        }

        #[cfg(target_os = "macos")]
        {
            macos::list_sessions()
        }

        #[cfg(target_os = "linux")]
        {
            linux::list_sessions()
        }

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            anyhow::bail!("Unsupported operating system for session enumeration")
        }
    }
}
