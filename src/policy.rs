//! Breaker policies: the state machine consulted by the interception wrapper.
//!
//! [`BreakerPolicy`] is the seam between the wrapper and the state machine. The wrapper
//! only ever asks whether a monitored call may proceed ([`BreakerPolicy::permit`]) and
//! reports the outcome afterwards; everything else (windows, timers, notification) is the
//! policy's business. [`WindowedPolicy`] is the production implementation.

use std::sync::Arc;

use crate::classify::OperationId;
use crate::error::BreakerOpen;
use crate::state::CircuitState;

mod windowed;

pub use windowed::WindowedPolicy;

/// Decides breaker state transitions from reported call outcomes.
pub trait BreakerPolicy: Send + Sync {
    /// A monitored call returned normally. Closes the breaker if it is not already closed.
    fn record_success(&self, operation: Option<&OperationId>);

    /// A monitored call failed with a classified failure kind.
    fn record_failure(&self, operation: Option<&OperationId>);

    /// Compare-and-transition: when open and the cooldown has elapsed, moves to half-open
    /// and returns `true`. Returns `false` otherwise, including when not open.
    fn should_attempt_reset(&self) -> bool;

    /// Current state.
    fn current_state(&self) -> CircuitState;

    /// Pre-call check for a monitored operation: `Err` when open and a reset attempt is not
    /// yet due.
    ///
    /// The default composes [`current_state`](Self::current_state) and
    /// [`should_attempt_reset`](Self::should_attempt_reset); implementations with a lock
    /// should override it to decide under a single acquisition.
    fn permit(&self) -> Result<(), BreakerOpen> {
        if self.current_state().is_open() && !self.should_attempt_reset() {
            return Err(BreakerOpen::new());
        }
        Ok(())
    }
}

impl<P> BreakerPolicy for Arc<P>
where
    P: BreakerPolicy + ?Sized,
{
    fn record_success(&self, operation: Option<&OperationId>) {
        (**self).record_success(operation)
    }

    fn record_failure(&self, operation: Option<&OperationId>) {
        (**self).record_failure(operation)
    }

    fn should_attempt_reset(&self) -> bool {
        (**self).should_attempt_reset()
    }

    fn current_state(&self) -> CircuitState {
        (**self).current_state()
    }

    fn permit(&self) -> Result<(), BreakerOpen> {
        (**self).permit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Hand-driven policy: state is whatever the test sets.
    #[derive(Default)]
    struct Scripted {
        state: Mutex<CircuitState>,
    }

    impl BreakerPolicy for Scripted {
        fn record_success(&self, _operation: Option<&OperationId>) {
            *self.state.lock().unwrap() = CircuitState::Closed;
        }

        fn record_failure(&self, _operation: Option<&OperationId>) {
            *self.state.lock().unwrap() = CircuitState::Open;
        }

        fn should_attempt_reset(&self) -> bool {
            false
        }

        fn current_state(&self) -> CircuitState {
            *self.state.lock().unwrap()
        }
    }

    #[test]
    fn default_permit_rejects_only_when_open() {
        let policy = Scripted::default();
        assert!(policy.permit().is_ok());
        policy.record_failure(None);
        assert_eq!(policy.permit(), Err(BreakerOpen::new()));
        *policy.state.lock().unwrap() = CircuitState::HalfOpen;
        assert!(policy.permit().is_ok());
    }

    #[test]
    fn arc_delegates_to_inner_policy() {
        let policy = Arc::new(Scripted::default());
        let shared: Arc<dyn BreakerPolicy> = policy.clone();
        shared.record_failure(None);
        assert_eq!(policy.current_state(), CircuitState::Open);
        shared.record_success(None);
        assert_eq!(shared.current_state(), CircuitState::Closed);
    }
}
