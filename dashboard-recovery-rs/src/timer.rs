//! # Cancellable Timer
//!
//! Backoff sleeps owned by a controller must be stoppable when the owner is
//! reset or torn down. Every [`CancellableTimer::cancel`] bumps a generation
//! counter published on a watch channel; pending waits observe the change and
//! resolve as [`TimerOutcome::Cancelled`]. Callers can also compare
//! generations to discard work that finished after a cancellation.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

/// How a [`CancellableTimer::wait`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    Elapsed,
    Cancelled,
}

#[derive(Debug)]
pub struct CancellableTimer {
    generation: watch::Sender<u64>,
}

impl CancellableTimer {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self { generation }
    }

    /// Sleeps for `delay` unless cancelled first
    pub async fn wait(&self, delay: Duration) -> TimerOutcome {
        let mut cancelled = self.generation.subscribe();

        tokio::select! {
            _ = sleep(delay) => TimerOutcome::Elapsed,
            _ = cancelled.changed() => TimerOutcome::Cancelled,
        }
    }

    /// Cancels every pending wait
    pub fn cancel(&self) {
        self.generation.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Number of cancellations issued so far
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// True while at least one wait is in progress
    pub fn is_pending(&self) -> bool {
        self.generation.receiver_count() > 0
    }
}

impl Default for CancellableTimer {
    fn default() -> Self {
        Self::new()
    }
}
