use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use super::{HandlerError, StateChange, StateChangeHandler};
use crate::state::CircuitState;

/// Logs every transition using the `tracing` crate.
///
/// Trips are logged at `warn`, recoveries at `info`.
#[derive(Clone, Debug, Default)]
pub struct LogHandler;

impl StateChangeHandler for LogHandler {
    fn on_change(&self, change: &StateChange) -> Result<(), HandlerError> {
        let operation = change.operation().map(|op| op.as_str()).unwrap_or("-");
        if change.new_state() == CircuitState::Open {
            tracing::warn!(
                target: "tripwire::notify",
                old = %change.old(),
                new = %change.new_state(),
                operation,
                "circuit breaker tripped"
            );
        } else {
            tracing::info!(
                target: "tripwire::notify",
                old = %change.old(),
                new = %change.new_state(),
                operation,
                "circuit breaker state change"
            );
        }
        Ok(())
    }
}

/// Stores transitions in memory, evicting the oldest beyond `capacity`.
#[derive(Debug)]
pub struct MemoryHandler {
    events: Mutex<VecDeque<StateChange>>,
    capacity: usize,
    evicted: AtomicU64,
}

impl MemoryHandler {
    /// Handler keeping the last 1024 transitions.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Handler keeping the last `capacity` transitions (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self { events: Mutex::new(VecDeque::new()), capacity: capacity.max(1), evicted: AtomicU64::new(0) }
    }

    /// Recorded transitions, oldest first.
    pub fn events(&self) -> Vec<StateChange> {
        self.lock().iter().cloned().collect()
    }

    /// Most recent transition.
    pub fn last(&self) -> Option<StateChange> {
        self.lock().back().cloned()
    }

    /// Number of stored transitions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop stored transitions; the eviction count is kept.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Transitions dropped because the buffer was full.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<StateChange>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl StateChangeHandler for MemoryHandler {
    fn on_change(&self, change: &StateChange) -> Result<(), HandlerError> {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(change.clone());
        Ok(())
    }
}

/// Forwards transitions to a `tokio` broadcast channel so async consumers can react
/// outside the policy lock.
///
/// Having no subscribers is not an error; the event is counted as dropped.
#[derive(Clone, Debug)]
pub struct BroadcastHandler {
    sender: broadcast::Sender<StateChange>,
    dropped: Arc<AtomicU64>,
}

impl BroadcastHandler {
    /// Channel buffering up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, dropped: Arc::new(AtomicU64::new(0)) }
    }

    /// New receiver that sees events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sender.subscribe()
    }

    /// Live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Events sent while nobody was subscribed.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl StateChangeHandler for BroadcastHandler {
    fn on_change(&self, change: &StateChange) -> Result<(), HandlerError> {
        if self.sender.send(change.clone()).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

/// Adapts a closure into a handler.
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&StateChange) -> Result<(), HandlerError> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<F> StateChangeHandler for FnHandler<F>
where
    F: Fn(&StateChange) -> Result<(), HandlerError> + Send + Sync,
{
    fn on_change(&self, change: &StateChange) -> Result<(), HandlerError> {
        (self.f)(change)
    }
}
