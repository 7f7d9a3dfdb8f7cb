use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::budget::config::TerminationStrategy;
use crate::budget::platform::{SYSTEM_ACCOUNT, SessionTerminator};
use crate::budget::scheduler::Countdown;
use crate::budget::store::{TimeBudget, UserBudgetStore};

/// Kind of session change reported by the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    Logon,
    Unlock,
    Logoff,
    Lock,
}

impl SessionChange {
    /// Logon and unlock start consuming budget
    pub fn is_resume(self) -> bool {
        matches!(self, SessionChange::Logon | SessionChange::Unlock)
    }
}

/// A session-change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: u32,
    pub reason: SessionChange,
    pub occurred_at: DateTime<Local>,
}

impl SessionEvent {
    pub fn new(session_id: u32, reason: SessionChange, occurred_at: DateTime<Local>) -> Self {
        Self {
            session_id,
            reason,
            occurred_at,
        }
    }

    /// Event stamped with the current time
    pub fn now(session_id: u32, reason: SessionChange) -> Self {
        Self::new(session_id, reason, Local::now())
    }
}

/// Why an event did not change any state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// No username for the session, or it belongs to the system account
    UnresolvedSession,
    /// The user has no configured budget
    UnmanagedUser,
    /// Handling failed unexpectedly; the event was dropped
    UnexpectedFault,
}

/// What handling an event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    /// Countdown armed for the remaining minutes
    Resumed {
        username: String,
        remaining_minutes: u32,
    },
    /// Elapsed time consumed and countdown cancelled
    Suspended {
        username: String,
        consumed_minutes: u32,
        remaining_minutes: u32,
    },
    /// Budget exhausted; `success` is what the terminator reported
    Terminated { username: String, success: bool },
    Ignored(IgnoreReason),
}

enum Resolution {
    Resolved(String),
    Ignored(IgnoreReason),
}

/// A session whose budget is currently counting down
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub username: String,
    pub session_id: u32,
    /// Identifies the countdown armed for this session; an expiry carrying
    /// another generation is stale
    generation: u64,
}

struct EngineState {
    store: UserBudgetStore,
    active: HashMap<u32, ActiveSession>,
    next_generation: u64,
}

/// Turns session-change notifications into budget accounting and forced
/// session termination.
///
/// Every state change, including countdown expiry, happens under a single
/// engine lock, so the store and the scheduler only ever see serialized calls.
pub struct SessionBudgetEngine {
    state: Mutex<EngineState>,
    terminator: Arc<dyn SessionTerminator>,
    scheduler: Arc<dyn Countdown>,
    strategy: TerminationStrategy,
    this: Weak<SessionBudgetEngine>,
}

impl SessionBudgetEngine {
    pub fn new(
        store: UserBudgetStore,
        terminator: Arc<dyn SessionTerminator>,
        scheduler: Arc<dyn Countdown>,
        strategy: TerminationStrategy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(EngineState {
                store,
                active: HashMap::new(),
                next_generation: 0,
            }),
            terminator,
            scheduler,
            strategy,
            this: this.clone(),
        })
    }

    /// Handle one session-change notification. Never fails; failures are
    /// logged and reported as an ignored event.
    pub async fn on_session_event(&self, event: SessionEvent) -> EventOutcome {
        debug!(
            "Session {} changed: {:?} at {}",
            event.session_id, event.reason, event.occurred_at
        );

        match self.handle_event(&event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(
                    "Error handling {:?} for session {}: {:#}",
                    event.reason, event.session_id, e
                );
                EventOutcome::Ignored(IgnoreReason::UnexpectedFault)
            }
        }
    }

    /// Copy of every user's budget
    pub async fn budgets(&self) -> Vec<(String, TimeBudget)> {
        self.state.lock().await.store.snapshot()
    }

    pub async fn budget(&self, username: &str) -> Option<TimeBudget> {
        self.state.lock().await.store.get(username).cloned()
    }

    /// Sessions with a countdown running
    pub async fn active_sessions(&self) -> Vec<ActiveSession> {
        self.state.lock().await.active.values().cloned().collect()
    }

    async fn handle_event(&self, event: &SessionEvent) -> Result<EventOutcome> {
        let resolution = self.resolve(event.session_id).await;

        let mut state = self.state.lock().await;

        // A session that went away can no longer be resolved, so a suspend is
        // billed to whoever the running countdown belongs to
        let tracked = state
            .active
            .get(&event.session_id)
            .map(|active| active.username.clone());

        let username = match (resolution, tracked) {
            (resolution, Some(tracked)) if !event.reason.is_resume() => {
                match resolution {
                    Resolution::Resolved(owner) if owner != tracked => debug!(
                        "Session {} now belongs to '{}', billing '{}'",
                        event.session_id, owner, tracked
                    ),
                    _ => {}
                }
                tracked
            }
            (Resolution::Resolved(username), _) => username,
            (Resolution::Ignored(reason), _) => return Ok(EventOutcome::Ignored(reason)),
        };

        if !state.store.is_managed(&username) {
            debug!("User '{}' has no budget, ignoring session {}", username, event.session_id);
            return Ok(EventOutcome::Ignored(IgnoreReason::UnmanagedUser));
        }

        if event.reason.is_resume() {
            self.resume(&mut state, &username, event).await
        } else {
            self.suspend(&mut state, &username, event)
        }
    }

    /// Look up the session owner off the async workers; lookups spawn
    /// processes or make blocking OS calls
    async fn resolve(&self, session_id: u32) -> Resolution {
        let terminator = self.terminator.clone();
        let resolved =
            tokio::task::spawn_blocking(move || terminator.resolve_username(session_id)).await;

        match resolved {
            Ok(Ok(Some(username)))
                if !username.is_empty() && !username.eq_ignore_ascii_case(SYSTEM_ACCOUNT) =>
            {
                Resolution::Resolved(username)
            }
            Ok(Ok(_)) => {
                debug!("Session {} has no interactive user, ignoring", session_id);
                Resolution::Ignored(IgnoreReason::UnresolvedSession)
            }
            Ok(Err(e)) => {
                debug!("Could not resolve user of session {}: {:#}", session_id, e);
                Resolution::Ignored(IgnoreReason::UnresolvedSession)
            }
            Err(e) => {
                debug!("Username lookup for session {} did not complete: {}", session_id, e);
                Resolution::Ignored(IgnoreReason::UnresolvedSession)
            }
        }
    }

    async fn resume(
        &self,
        state: &mut EngineState,
        username: &str,
        event: &SessionEvent,
    ) -> Result<EventOutcome> {
        let today = event.occurred_at.date_naive();
        if state.store.reset_if_new_day(username, today) {
            info!("New day for '{}', budget reset", username);
        }
        state.store.set_last_resume(username, Some(event.occurred_at));

        if state.store.is_exhausted(username) {
            info!(
                "'{}' has no time left today, ending session {}",
                username, event.session_id
            );
            return Ok(self.terminate(state, username, event.session_id).await);
        }

        let remaining_minutes = state
            .store
            .get(username)
            .map(|b| b.remaining_minutes)
            .with_context(|| format!("Budget for '{}' disappeared", username))?;

        let generation = state.next_generation;
        state.next_generation += 1;

        if state.active.contains_key(&event.session_id) {
            debug!("Session {} resumed again, replacing its countdown", event.session_id);
        }
        state.active.insert(
            event.session_id,
            ActiveSession {
                username: username.to_string(),
                session_id: event.session_id,
                generation,
            },
        );

        let engine = self.this.clone();
        let session_id = event.session_id;
        self.scheduler.arm(
            session_id,
            Duration::from_secs(u64::from(remaining_minutes) * 60),
            Box::pin(async move {
                if let Some(engine) = engine.upgrade() {
                    engine.on_countdown_expired(session_id, generation).await;
                }
            }),
        );

        info!(
            "Session {} of '{}' resumed with {} minutes left",
            session_id, username, remaining_minutes
        );
        Ok(EventOutcome::Resumed {
            username: username.to_string(),
            remaining_minutes,
        })
    }

    fn suspend(
        &self,
        state: &mut EngineState,
        username: &str,
        event: &SessionEvent,
    ) -> Result<EventOutcome> {
        let last_resume_at = state
            .store
            .get(username)
            .with_context(|| format!("Budget for '{}' disappeared", username))?
            .last_resume_at;

        let consumed_minutes = last_resume_at
            .map(|since| elapsed_minutes(since, event.occurred_at))
            .unwrap_or(0);

        state.store.consume(username, consumed_minutes);
        state.store.set_last_resume(username, None);

        self.scheduler.cancel(event.session_id);
        state.active.remove(&event.session_id);

        let remaining_minutes = state
            .store
            .get(username)
            .map(|b| b.remaining_minutes)
            .unwrap_or(0);

        info!(
            "Session {} of '{}' suspended: used {} minutes, {} left",
            event.session_id, username, consumed_minutes, remaining_minutes
        );
        Ok(EventOutcome::Suspended {
            username: username.to_string(),
            consumed_minutes,
            remaining_minutes,
        })
    }

    async fn on_countdown_expired(&self, session_id: u32, generation: u64) {
        let mut state = self.state.lock().await;

        let username = match state.active.get(&session_id) {
            Some(active) if active.generation == generation => active.username.clone(),
            _ => {
                debug!("Ignoring stale countdown for session {}", session_id);
                return;
            }
        };

        // Session ids can be reused (the macOS console is always 0); never end
        // somebody else's session on this user's countdown
        if let Resolution::Resolved(owner) = self.resolve(session_id).await {
            if owner != username {
                warn!(
                    "Session {} changed hands from '{}' to '{}' unnoticed, dropping its countdown",
                    session_id, username, owner
                );
                state.active.remove(&session_id);
                state.store.set_last_resume(&username, None);
                return;
            }
        }

        info!("Time is up for '{}' in session {}", username, session_id);
        self.terminate(&mut state, &username, session_id).await;
    }

    /// Exhaust the user's budget and end the session. Safe to repeat.
    async fn terminate(
        &self,
        state: &mut EngineState,
        username: &str,
        session_id: u32,
    ) -> EventOutcome {
        state.store.exhaust(username);
        state.store.set_last_resume(username, None);
        self.scheduler.cancel(session_id);
        state.active.remove(&session_id);

        let strategy = self.strategy;
        let terminator = self.terminator.clone();
        let success =
            tokio::task::spawn_blocking(move || terminator.terminate(session_id, strategy))
                .await
                .unwrap_or_else(|e| {
                    error!("Ending session {} did not complete: {}", session_id, e);
                    false
                });

        if success {
            info!("Ended session {} of '{}' ({:?})", session_id, username, strategy);
        } else {
            warn!(
                "Could not end session {} of '{}' ({:?}); budget stays exhausted",
                session_id, username, strategy
            );
        }

        EventOutcome::Terminated {
            username: username.to_string(),
            success,
        }
    }
}

/// Whole minutes between two instants, partial minutes rounded up, never negative
fn elapsed_minutes(since: DateTime<Local>, until: DateTime<Local>) -> u32 {
    let seconds = (until - since).num_seconds().max(0);
    let minutes = (seconds + 59) / 60;
    u32::try_from(minutes).unwrap_or(u32::MAX)
}
