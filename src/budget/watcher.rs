use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use crate::budget::engine::{SessionBudgetEngine, SessionChange, SessionEvent};
use crate::budget::platform::{SessionInfo, SessionLister, SessionState};

/// What the watcher last saw of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedSession {
    pub state: SessionState,
    pub username: Option<String>,
}

/// Last observed state of each session
pub type SessionSnapshot = HashMap<u32, ObservedSession>;

/// Polls the OS session list and feeds the differences to the engine as
/// session-change events
pub struct SessionWatcher {
    lister: Arc<dyn SessionLister>,
    engine: Arc<SessionBudgetEngine>,
    poll_interval: Duration,
}

impl SessionWatcher {
    pub fn new(
        lister: Arc<dyn SessionLister>,
        engine: Arc<SessionBudgetEngine>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            lister,
            engine,
            poll_interval,
        }
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Watching sessions every {} seconds",
            self.poll_interval.as_secs()
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut previous = SessionSnapshot::new();

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    previous = self.poll_once(&previous).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Session watcher stopped");
                        break;
                    }
                }
            }
        }
    }

    /// One poll: list sessions, dispatch the changes, return the new snapshot
    pub async fn poll_once(&self, previous: &SessionSnapshot) -> SessionSnapshot {
        let sessions = match self.lister.list_sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Failed to list sessions: {:#}", e);
                return previous.clone();
            }
        };

        let current = snapshot_of(&sessions);
        for (session_id, reason) in diff_snapshots(previous, &current) {
            let outcome = self
                .engine
                .on_session_event(SessionEvent::now(session_id, reason))
                .await;
            debug!("Session {} {:?}: {:?}", session_id, reason, outcome);
        }

        current
    }
}

pub fn snapshot_of(sessions: &[SessionInfo]) -> SessionSnapshot {
    sessions
        .iter()
        .map(|s| {
            (
                s.session_id,
                ObservedSession {
                    state: s.state,
                    username: s.username.clone(),
                },
            )
        })
        .collect()
}

/// Session-change events implied by moving from `previous` to `current`.
///
/// A session id whose owner changed between polls is reported as the old
/// owner logging off and the new one logging on. Events come out ordered by
/// session id so replays are deterministic.
pub fn diff_snapshots(
    previous: &SessionSnapshot,
    current: &SessionSnapshot,
) -> Vec<(u32, SessionChange)> {
    let mut changes = Vec::new();

    for (&session_id, seen) in current {
        let Some(before) = previous.get(&session_id) else {
            if seen.state == SessionState::Active {
                changes.push((session_id, SessionChange::Logon));
            }
            continue;
        };

        let owner_changed = before.username.is_some()
            && seen.username.is_some()
            && before.username != seen.username;

        if owner_changed {
            if before.state == SessionState::Active {
                changes.push((session_id, SessionChange::Logoff));
            }
            if seen.state == SessionState::Active {
                changes.push((session_id, SessionChange::Logon));
            }
            continue;
        }

        match (before.state, seen.state) {
            (SessionState::Locked, SessionState::Active) => {
                changes.push((session_id, SessionChange::Unlock))
            }
            (SessionState::Active, SessionState::Locked) => {
                changes.push((session_id, SessionChange::Lock))
            }
            _ => {}
        }
    }

    for (&session_id, before) in previous {
        // A locked session already stopped counting when it was locked
        if !current.contains_key(&session_id) && before.state == SessionState::Active {
            changes.push((session_id, SessionChange::Logoff));
        }
    }

    changes.sort_by_key(|(session_id, _)| *session_id);
    changes
}
