use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

/// Work to run when a countdown expires
pub type ExpiryTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Single-shot countdowns keyed by OS session id
pub trait Countdown: Send + Sync {
    /// Run `on_expire` after `duration`, replacing any countdown already armed
    /// for `session_id`. The replaced countdown never fires.
    fn arm(&self, session_id: u32, duration: Duration, on_expire: ExpiryTask);

    /// Cancel the countdown for `session_id`. Returns false if none was pending.
    fn cancel(&self, session_id: u32) -> bool;

    fn is_armed(&self, session_id: u32) -> bool;
}

struct PendingCountdown {
    id: u64,
    handle: AbortHandle,
}

/// Countdown scheduler backed by tokio tasks.
///
/// Each armed countdown is its own task sleeping on the tokio timer. A task
/// deregisters itself right before running its expiry work, so a `cancel`
/// that arrives after that point is a no-op and the expiry proceeds.
#[derive(Clone, Default)]
pub struct CountdownScheduler {
    pending: Arc<Mutex<HashMap<u32, PendingCountdown>>>,
    next_id: Arc<AtomicU64>,
}

impl CountdownScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of countdowns that have not fired or been cancelled yet
    pub fn pending(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u32, PendingCountdown>> {
        // The map holds no invariants a panicking holder could break
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Countdown for CountdownScheduler {
    fn arm(&self, session_id: u32, duration: Duration, on_expire: ExpiryTask) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + duration;
        let pending = self.pending.clone();

        // Hold the map lock across spawn so the task cannot deregister
        // before it has been registered.
        let mut map = self.lock_pending();

        if let Some(previous) = map.remove(&session_id) {
            previous.handle.abort();
            debug!("Replaced countdown for session {}", session_id);
        }

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;

            {
                let mut map = pending.lock().unwrap_or_else(|e| e.into_inner());
                match map.get(&session_id) {
                    Some(current) if current.id == id => {
                        map.remove(&session_id);
                    }
                    // Superseded between wake-up and here
                    _ => return,
                }
            }

            debug!("Countdown for session {} expired", session_id);
            on_expire.await;
        });

        map.insert(
            session_id,
            PendingCountdown {
                id,
                handle: task.abort_handle(),
            },
        );
        debug!(
            "Armed countdown for session {} ({} seconds)",
            session_id,
            duration.as_secs()
        );
    }

    fn cancel(&self, session_id: u32) -> bool {
        match self.lock_pending().remove(&session_id) {
            Some(countdown) => {
                countdown.handle.abort();
                debug!("Cancelled countdown for session {}", session_id);
                true
            }
            None => false,
        }
    }

    fn is_armed(&self, session_id: u32) -> bool {
        self.lock_pending().contains_key(&session_id)
    }
}
