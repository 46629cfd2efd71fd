//! State-change notification.
//!
//! A policy owns one [`HandlerSet`]: an ordered, duplicate-free list of
//! [`StateChangeHandler`]s that receive every [`StateChange`] synchronously, in attachment
//! order, from inside the call that performed the transition.
//!
//! Delivery is isolated per handler. A handler that returns an error or panics is logged
//! and skipped; the remaining handlers still run and the transition stays committed.
//!
//! The list is published through an `ArcSwap`, so attach/detach never block on, nor
//! corrupt, a delivery already in progress: each delivery iterates the snapshot it loaded.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::classify::OperationId;
use crate::state::CircuitState;

pub mod handlers;

pub use handlers::{BroadcastHandler, FnHandler, LogHandler, MemoryHandler};

/// Error a handler may return; logged, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Payload delivered to handlers on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    old: CircuitState,
    new: CircuitState,
    operation: Option<OperationId>,
}

impl StateChange {
    /// Describe a transition, optionally caused by a call to `operation`.
    pub fn new(old: CircuitState, new: CircuitState, operation: Option<OperationId>) -> Self {
        Self { old, new, operation }
    }

    /// State before the transition.
    pub fn old(&self) -> CircuitState {
        self.old
    }

    /// State after the transition.
    pub fn new_state(&self) -> CircuitState {
        self.new
    }

    /// Operation whose outcome caused the transition; `None` for reset probes and manual
    /// resets.
    pub fn operation(&self) -> Option<&OperationId> {
        self.operation.as_ref()
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.old, self.new)?;
        if let Some(op) = &self.operation {
            write!(f, " ({})", op)?;
        }
        Ok(())
    }
}

/// Receives breaker state changes.
///
/// Handlers run while the policy lock is held. They may read the lock-free accessors
/// ([`current_state`](crate::BreakerPolicy::current_state), and on
/// [`WindowedPolicy`](crate::WindowedPolicy) also `failure_count`, `tripped_at` and
/// `config`) but must not call the same policy's `record_success`, `record_failure`,
/// `record_failure_at`, `should_attempt_reset`, `should_attempt_reset_at`, `permit`,
/// `permit_at` or `reset`.
pub trait StateChangeHandler: Send + Sync {
    /// Called once per transition.
    fn on_change(&self, change: &StateChange) -> Result<(), HandlerError>;
}

type HandlerList = Vec<Arc<dyn StateChangeHandler>>;

fn same_handler(a: &Arc<dyn StateChangeHandler>, b: &Arc<dyn StateChangeHandler>) -> bool {
    // compare data pointers only; vtable pointers are not guaranteed unique
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Ordered set of handlers; identity is `Arc` pointer identity.
pub struct HandlerSet {
    handlers: ArcSwap<HandlerList>,
}

impl HandlerSet {
    /// Empty set.
    pub fn new() -> Self {
        Self { handlers: ArcSwap::from_pointee(Vec::new()) }
    }

    /// Set seeded with `handlers`, dropping duplicates while keeping first-seen order.
    pub fn from_handlers<I>(handlers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn StateChangeHandler>>,
    {
        let mut list: HandlerList = Vec::new();
        for handler in handlers {
            if !list.iter().any(|h| same_handler(h, &handler)) {
                list.push(handler);
            }
        }
        Self { handlers: ArcSwap::from_pointee(list) }
    }

    /// Append `handler` unless already present. Returns `true` if it was added.
    pub fn attach(&self, handler: Arc<dyn StateChangeHandler>) -> bool {
        let mut added = false;
        self.handlers.rcu(|current| {
            if current.iter().any(|h| same_handler(h, &handler)) {
                added = false;
                Arc::clone(current)
            } else {
                added = true;
                let mut next = HandlerList::clone(current);
                next.push(Arc::clone(&handler));
                Arc::new(next)
            }
        });
        added
    }

    /// Remove `handler` if present. Returns `true` if it was removed.
    pub fn detach(&self, handler: &Arc<dyn StateChangeHandler>) -> bool {
        let mut removed = false;
        self.handlers.rcu(|current| {
            let next: HandlerList =
                current.iter().filter(|h| !same_handler(h, handler)).cloned().collect();
            removed = next.len() != current.len();
            if removed {
                Arc::new(next)
            } else {
                Arc::clone(current)
            }
        });
        removed
    }

    /// Number of attached handlers.
    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    /// True when no handler is attached.
    pub fn is_empty(&self) -> bool {
        self.handlers.load().is_empty()
    }

    /// Deliver `change` to a snapshot of the current handlers, in order.
    pub fn notify(&self, change: &StateChange) {
        let snapshot = self.handlers.load_full();
        for (index, handler) in snapshot.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| handler.on_change(change))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(
                        target: "tripwire::notify",
                        handler = index,
                        change = %change,
                        error = %error,
                        "error while notifying of circuit breaker state change"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        target: "tripwire::notify",
                        handler = index,
                        change = %change,
                        "state change handler panicked"
                    );
                }
            }
        }
    }
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet").field("len", &self.len()).finish()
    }
}
