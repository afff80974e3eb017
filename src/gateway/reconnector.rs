//! Bounded backoff retry loop around [`Session::connect`].
//!
//! The reconnector only knows how to get the socket back up; it does not
//! wait for `READY`. The supervisor's watchdog decides what "success" means
//! for its own bookkeeping once the session is reconnected.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

use super::backoff;
use super::error::{Error, Result};
use super::session::Session;

/// Drives repeated `Connect` attempts with [`backoff::delay`] between them,
/// up to `max_attempts`. `Stop` is cooperative and idempotent.
pub struct Reconnector {
    max_attempts: u32,
    attempt: AtomicU32,
    stopped: AtomicBool,
    stop_notify: Notify,
}

impl std::fmt::Debug for Reconnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconnector")
            .field("max_attempts", &self.max_attempts)
            .field("attempt", &self.attempts())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Reconnector {
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempt: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    /// Signals the run loop to give up at the next checkpoint. Safe to call
    /// more than once, and from a task other than the one running `run`.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.stop_notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Current attempt count, for status reporting (e.g. "backoff, attempt 3/10").
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Runs the retry loop until `Connect` succeeds, attempts are exhausted,
    /// or `Stop` is called. On success resets the attempt counter to 0.
    ///
    /// # Errors
    /// Returns the last connect error once `max_attempts` is exhausted, or
    /// [`Error::NotConnected`] if stopped before a successful attempt.
    pub async fn run(&self, session: &Arc<Session>) -> Result<()> {
        loop {
            if self.is_stopped() {
                return Err(Error::NotConnected);
            }

            let attempt = self.attempt.load(Ordering::SeqCst);
            let wait = backoff::delay(attempt);
            debug!(attempt, ?wait, "reconnector backing off");

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                () = self.stop_notify.notified() => return Err(Error::NotConnected),
            }

            match session.connect().await {
                Ok(()) => {
                    self.attempt.store(0, Ordering::SeqCst);
                    return Ok(());
                }
                Err(e) => {
                    let next = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
                    if next >= self.max_attempts {
                        warn!(server_id = session.server_id(), attempts = next, "reconnect attempts exhausted");
                        return Err(e);
                    }
                }
            }
        }
    }
}
