//! Grace-period reclamation of the pooled idle context.
//!
//! Every donation arms one reclamation task. The task sleeps on the pool's
//! condition variable until the grace period elapses or it is cancelled.
//! If it is still armed when it wakes, it commits: from that moment
//! cancellation requests are ignored, and the idle context is taken out of
//! the slot and torn down.

use super::pool::Shared;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const ARMED: u8 = 0;
const CANCELLED: u8 = 1;
const COMMITTED: u8 = 2;
const COMPLETED: u8 = 3;

/// Lifecycle of one reclamation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimState {
    /// Waiting for the grace period to elapse.
    Armed,
    /// Cancelled before the commit point; the task exits without touching the slot.
    Cancelled,
    /// Past the point of no return; the idle context is being torn down.
    Committed,
    /// The idle context has been torn down.
    Completed,
}

/// Shared cancellation state between the pool and one reclamation task.
#[derive(Debug)]
pub struct ReclaimToken {
    state: AtomicU8,
}

impl ReclaimToken {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(ARMED),
        })
    }

    /// Returns the current state of the task.
    pub fn state(&self) -> ReclaimState {
        match self.state.load(Ordering::Acquire) {
            ARMED => ReclaimState::Armed,
            CANCELLED => ReclaimState::Cancelled,
            COMMITTED => ReclaimState::Committed,
            _ => ReclaimState::Completed,
        }
    }

    fn is_armed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ARMED
    }

    /// Requests cancellation.
    ///
    /// Returns false if the task has already committed, in which case the
    /// request has no effect.
    pub fn cancel(&self) -> bool {
        match self
            .state
            .compare_exchange(ARMED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == CANCELLED,
        }
    }

    /// Passes the point of no return. Fails if the task was cancelled first.
    fn commit(&self) -> bool {
        self.state
            .compare_exchange(ARMED, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn complete(&self) {
        self.state.store(COMPLETED, Ordering::Release);
    }
}

/// A running reclamation task, owned by the pool slot while armed.
#[derive(Debug)]
pub(crate) struct ReclaimTimer {
    token: Arc<ReclaimToken>,
    thread: JoinHandle<()>,
}

impl ReclaimTimer {
    /// Starts a task that reclaims the slot's idle context after `grace_period`.
    pub(crate) fn spawn<C: Send + 'static>(
        shared: Arc<Shared<C>>,
        token: Arc<ReclaimToken>,
        grace_period: Duration,
    ) -> io::Result<Self> {
        let deadline = Instant::now() + grace_period;
        let task_token = Arc::clone(&token);
        let thread = thread::Builder::new()
            .name("synth-reclaim".to_string())
            .spawn(move || reclaim_after(shared, task_token, deadline))?;
        Ok(Self { token, thread })
    }

    /// Requests cancellation of the task. Caller must hold the slot lock and
    /// notify the pool's condition variable afterwards.
    pub(crate) fn cancel(&self) -> bool {
        self.token.cancel()
    }

    pub(crate) fn is(&self, token: &Arc<ReclaimToken>) -> bool {
        Arc::ptr_eq(&self.token, token)
    }

    /// Waits for a cancelled task to exit. Must be called without the slot lock.
    pub(crate) fn join(self) {
        if self.thread.join().is_err() {
            tracing::warn!("Reclamation task panicked");
        }
    }
}

/// Body of the reclamation task.
fn reclaim_after<C>(shared: Arc<Shared<C>>, token: Arc<ReclaimToken>, deadline: Instant) {
    let reclaimed = {
        let mut slot = shared.slot.lock();
        while token.is_armed() {
            if shared.wake.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }

        if !token.commit() {
            return;
        }

        // An armed token is always the one in the slot: every path that takes
        // the timer out of the slot cancels it first.
        let timer = slot.timer.take();
        debug_assert!(timer.as_ref().is_some_and(|t| t.is(&token)));
        // Dropping our own handle detaches this thread
        drop(timer);
        slot.idle.take()
    };

    if let Some(context) = reclaimed {
        drop(context);
        shared.stats.record_reclaimed();
        tracing::info!("Reclaimed idle synth context after grace period");
    }
    token.complete();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_before_commit() {
        let token = ReclaimToken::new();
        assert_eq!(token.state(), ReclaimState::Armed);
        assert!(token.cancel());
        assert_eq!(token.state(), ReclaimState::Cancelled);

        // Cancelling twice is fine, committing afterwards is not
        assert!(token.cancel());
        assert!(!token.commit());
        assert_eq!(token.state(), ReclaimState::Cancelled);
    }

    #[test]
    fn test_cancel_after_commit_is_ignored() {
        let token = ReclaimToken::new();
        assert!(token.commit());
        assert_eq!(token.state(), ReclaimState::Committed);

        assert!(!token.cancel());
        assert_eq!(token.state(), ReclaimState::Committed);

        token.complete();
        assert!(!token.cancel());
        assert_eq!(token.state(), ReclaimState::Completed);
    }
}
