//! Single-slot cache of an idle synthesizer context.
//!
//! Building a context is expensive and a playlist of MIDI files almost always
//! plays them one after another, so a closed session donates its context
//! back here and the next `acquire` picks it up. The slot holds at most one
//! context; a donation that finds it occupied is rejected and the caller
//! destroys its own context. An idle context that nobody acquires within the
//! grace period is torn down by a reclamation task (see `reclaim`).
//!
//! The idle context and its reclamation task are always stored and removed
//! together, under the slot lock.

use super::context::SynthError;
use super::reclaim::{ReclaimState, ReclaimTimer, ReclaimToken};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How long an idle context survives in the slot without being acquired.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(300);

/// Builds a new context when the slot is empty.
pub type ContextFactory<C> = Box<dyn Fn() -> Result<C, SynthError> + Send + Sync>;

/// Outcome of offering a context to the pool.
#[derive(Debug)]
pub enum Donation<C> {
    /// The context now sits in the slot.
    Pooled,
    /// The slot was taken; the context is handed back for the caller to destroy.
    Rejected(C),
}

impl<C> Donation<C> {
    /// Returns true if the context was accepted.
    pub fn is_pooled(&self) -> bool {
        matches!(self, Donation::Pooled)
    }
}

/// Snapshot of pool traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Contexts built by the factory.
    pub created: usize,
    /// Acquisitions served from the slot.
    pub reused: usize,
    /// Idle contexts torn down by a reclamation task.
    pub reclaimed: usize,
    /// Donations turned away because the slot was occupied.
    pub rejected: usize,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    created: AtomicUsize,
    reused: AtomicUsize,
    reclaimed: AtomicUsize,
    rejected: AtomicUsize,
}

impl Counters {
    pub(crate) fn record_reclaimed(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            reclaimed: self.reclaimed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct Slot<C> {
    pub(crate) idle: Option<C>,
    pub(crate) timer: Option<ReclaimTimer>,
    /// Token of the most recent donation, kept for inspection.
    last_token: Option<Arc<ReclaimToken>>,
}

/// State shared with reclamation tasks.
pub(crate) struct Shared<C> {
    pub(crate) slot: Mutex<Slot<C>>,
    /// Wakes sleeping reclamation tasks when they are cancelled.
    pub(crate) wake: Condvar,
    pub(crate) stats: Counters,
}

/// A process-wide, single-slot pool of synthesizer contexts.
pub struct SynthPool<C: Send + 'static> {
    shared: Arc<Shared<C>>,
    factory: ContextFactory<C>,
    grace_period: Duration,
}

impl<C: Send + 'static> std::fmt::Debug for SynthPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthPool")
            .field("grace_period", &self.grace_period)
            .field("idle", &self.is_idle())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<C: Send + 'static> SynthPool<C> {
    /// Creates an empty pool.
    ///
    /// # Arguments
    ///
    /// * `grace_period` - How long a donated context may sit idle before it is torn down
    /// * `factory` - Builds a fresh context when the slot is empty
    pub fn new<F>(grace_period: Duration, factory: F) -> Self
    where
        F: Fn() -> Result<C, SynthError> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    idle: None,
                    timer: None,
                    last_token: None,
                }),
                wake: Condvar::new(),
                stats: Counters::default(),
            }),
            factory: Box::new(factory),
            grace_period,
        }
    }

    /// Returns the configured grace period.
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Takes the idle context, or builds a new one if the slot is empty.
    ///
    /// Taking the idle context cancels its reclamation. If the reclamation has
    /// already committed, the slot is empty and a new context is built.
    ///
    /// # Errors
    ///
    /// Returns error only if the factory is called and fails.
    pub fn acquire(&self) -> Result<C, SynthError> {
        let (idle, timer) = {
            let mut slot = self.shared.slot.lock();
            let idle = slot.idle.take();
            let timer = slot.timer.take();
            if let Some(timer) = &timer {
                timer.cancel();
                self.shared.wake.notify_all();
            }
            (idle, timer)
        };

        if let Some(timer) = timer {
            timer.join();
        }

        if let Some(context) = idle {
            self.shared.stats.reused.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Reusing idle synth context");
            return Ok(context);
        }

        let context = (self.factory)()?;
        self.shared.stats.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Built new synth context");
        Ok(context)
    }

    /// Offers a context to the slot and arms its reclamation.
    ///
    /// The caller must reset the context first so that nothing from the
    /// previous track carries over. If another context already occupies the
    /// slot, `Donation::Rejected` hands this one back to be destroyed.
    pub fn donate(&self, context: C) -> Donation<C> {
        let mut slot = self.shared.slot.lock();
        if slot.idle.is_some() {
            drop(slot);
            self.shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Pool slot already occupied, rejecting donation");
            return Donation::Rejected(context);
        }

        // The timer never outlives the idle context, but never leave a live one behind
        let stale = slot.timer.take();
        if let Some(timer) = &stale {
            timer.cancel();
            self.shared.wake.notify_all();
        }

        let token = ReclaimToken::new();
        let outcome = match ReclaimTimer::spawn(
            Arc::clone(&self.shared),
            Arc::clone(&token),
            self.grace_period,
        ) {
            Ok(timer) => {
                slot.idle = Some(context);
                slot.timer = Some(timer);
                slot.last_token = Some(token);
                tracing::debug!("Pooled idle synth context for {:?}", self.grace_period);
                Donation::Pooled
            }
            Err(e) => {
                tracing::warn!("Cannot start reclamation task, not pooling: {}", e);
                self.shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Donation::Rejected(context)
            }
        };
        drop(slot);

        if let Some(timer) = stale {
            timer.join();
        }
        outcome
    }

    /// Destroys the idle context, if any, without waiting for its grace period.
    ///
    /// Returns true if a context was destroyed.
    pub fn drain(&self) -> bool {
        let (idle, timer) = {
            let mut slot = self.shared.slot.lock();
            let idle = slot.idle.take();
            let timer = slot.timer.take();
            if let Some(timer) = &timer {
                timer.cancel();
                self.shared.wake.notify_all();
            }
            (idle, timer)
        };

        if let Some(timer) = timer {
            timer.join();
        }

        match idle {
            Some(context) => {
                drop(context);
                tracing::debug!("Drained idle synth context");
                true
            }
            None => false,
        }
    }

    /// Returns true if a context is waiting in the slot.
    pub fn is_idle(&self) -> bool {
        self.shared.slot.lock().idle.is_some()
    }

    /// Returns the state of the most recently armed reclamation, if any.
    pub fn reclaim_state(&self) -> Option<ReclaimState> {
        self.shared
            .slot
            .lock()
            .last_token
            .as_ref()
            .map(|token| token.state())
    }

    /// Returns a snapshot of the traffic counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats.snapshot()
    }
}

impl<C: Send + 'static> Drop for SynthPool<C> {
    fn drop(&mut self) {
        self.drain();
    }
}
