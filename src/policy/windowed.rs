//! Sliding-window policy.
//!
//! Counts classified failures inside a sliding window and trips once the count reaches
//! the threshold; after the half-open timeout the next reset probe moves to half-open,
//! and any success closes the breaker.
//!
//! Invariants:
//! - The window only holds timestamps within `threshold_window` of the newest recorded
//!   failure; it is pruned on every insertion and is not cleared when the breaker closes.
//! - `tripped_at` is `Some` iff the last transition entered `Open`.
//! - State, window and notification dispatch change under one per-policy mutex; the
//!   atomic mirrors (state, failure count, trip time) are written only while that mutex
//!   is held, and always before handlers run.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::classify::OperationId;
use crate::clock::{duration_millis, Clock, MonotonicClock};
use crate::config::PolicyConfig;
use crate::error::{BreakerOpen, ConfigError};
use crate::notify::{HandlerSet, StateChange, StateChangeHandler};
use crate::policy::BreakerPolicy;
use crate::state::CircuitState;

const NOT_TRIPPED: u64 = u64::MAX;

#[derive(Debug, Default)]
struct Window {
    // most-recent-first
    failures: VecDeque<u64>,
    tripped_at: Option<u64>,
    state: CircuitState,
}

/// Windowed circuit breaker policy. One instance per protected resource; share it with
/// `Arc`.
///
/// # Examples
/// ```
/// use tripwire::{CircuitState, ManualClock, WindowedPolicy};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let policy = WindowedPolicy::new(2, 5, 10).unwrap().with_clock(clock.clone());
///
/// policy.record_failure(None);
/// clock.advance(Duration::from_secs(1));
/// policy.record_failure(None);
/// assert_eq!(policy.current_state(), CircuitState::Open);
///
/// clock.advance(Duration::from_secs(5));
/// assert!(policy.should_attempt_reset());
/// assert_eq!(policy.current_state(), CircuitState::HalfOpen);
/// ```
#[derive(Debug)]
pub struct WindowedPolicy {
    config: PolicyConfig,
    window_millis: u64,
    cooldown_millis: u64,
    window: Mutex<Window>,
    state: AtomicU8,
    failures: AtomicUsize,
    tripped: AtomicU64,
    handlers: HandlerSet,
    clock: Arc<dyn Clock>,
}

impl WindowedPolicy {
    /// Create a policy, validating that every parameter is > 0.
    ///
    /// `trip_threshold` classified failures within `threshold_window_secs` trip the
    /// breaker; a reset attempt is allowed `half_open_timeout_secs` after tripping.
    pub fn new(
        trip_threshold: u32,
        half_open_timeout_secs: u64,
        threshold_window_secs: u64,
    ) -> Result<Self, ConfigError> {
        Self::with_handlers(trip_threshold, half_open_timeout_secs, threshold_window_secs, [])
    }

    /// Like [`WindowedPolicy::new`], seeding the handler list (duplicates dropped).
    pub fn with_handlers<I>(
        trip_threshold: u32,
        half_open_timeout_secs: u64,
        threshold_window_secs: u64,
        handlers: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Arc<dyn StateChangeHandler>>,
    {
        let config = PolicyConfig::new(
            trip_threshold,
            Duration::from_secs(threshold_window_secs),
            Duration::from_secs(half_open_timeout_secs),
        )?;
        Ok(Self::assemble(config, HandlerSet::from_handlers(handlers)))
    }

    /// Create a policy from an already validated config.
    pub fn from_config(config: PolicyConfig) -> Self {
        Self::assemble(config, HandlerSet::new())
    }

    fn assemble(config: PolicyConfig, handlers: HandlerSet) -> Self {
        Self {
            window_millis: duration_millis(config.threshold_window()),
            cooldown_millis: duration_millis(config.half_open_timeout()),
            config,
            window: Mutex::new(Window::default()),
            state: AtomicU8::new(CircuitState::Closed.to_u8()),
            failures: AtomicUsize::new(0),
            tripped: AtomicU64::new(NOT_TRIPPED),
            handlers,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Configuration in force.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Lock-free read of the current state; safe to call from a handler.
    pub fn current_state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Failures currently inside the window. Lock-free; safe to call from a handler.
    pub fn failure_count(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    /// Clock reading at which the breaker last tripped, while it is open. Lock-free; safe
    /// to call from a handler.
    pub fn tripped_at(&self) -> Option<u64> {
        match self.tripped.load(Ordering::Acquire) {
            NOT_TRIPPED => None,
            at => Some(at),
        }
    }

    /// Attach a handler; returns `false` if it was already attached.
    pub fn attach_handler(&self, handler: Arc<dyn StateChangeHandler>) -> bool {
        self.handlers.attach(handler)
    }

    /// Detach a handler; returns `false` if it was not attached.
    pub fn detach_handler(&self, handler: &Arc<dyn StateChangeHandler>) -> bool {
        self.handlers.detach(handler)
    }

    /// Close the breaker after a successful monitored call.
    ///
    /// Emits one event when leaving `Open` or `HalfOpen`; no-op when already closed. The
    /// failure window is left untouched.
    pub fn record_success(&self, operation: Option<&OperationId>) {
        let mut window = self.lock();
        if window.state != CircuitState::Closed {
            window.tripped_at = None;
            self.transition(&mut window, CircuitState::Closed, operation);
        }
    }

    /// Record a classified failure at the clock's current time.
    pub fn record_failure(&self, operation: Option<&OperationId>) {
        self.record_failure_at(self.clock.now_millis(), operation);
    }

    /// Record a classified failure at `timestamp` (milliseconds on the policy clock).
    ///
    /// Prunes failures older than `newest - threshold_window`, then trips to `Open` if the
    /// remaining count reaches the threshold while `Closed` or `HalfOpen`.
    pub fn record_failure_at(&self, timestamp: u64, operation: Option<&OperationId>) {
        let mut window = self.lock();

        let at = window.failures.partition_point(|&t| t > timestamp);
        window.failures.insert(at, timestamp);
        let newest = window.failures.front().copied().unwrap_or(timestamp);
        let cutoff = newest.saturating_sub(self.window_millis);
        while window.failures.back().is_some_and(|&t| t < cutoff) {
            window.failures.pop_back();
        }
        self.publish(&window);

        let failures = window.failures.len();
        tracing::debug!(
            target: "tripwire::policy",
            failures,
            threshold = self.config.trip_threshold(),
            operation = operation.map(OperationId::as_str),
            "classified failure recorded"
        );

        if failures >= self.config.trip_threshold() as usize
            && matches!(window.state, CircuitState::Closed | CircuitState::HalfOpen)
        {
            window.tripped_at = Some(timestamp);
            self.transition(&mut window, CircuitState::Open, operation);
        }
    }

    /// [`WindowedPolicy::should_attempt_reset_at`] using the clock's current time.
    pub fn should_attempt_reset(&self) -> bool {
        self.should_attempt_reset_at(self.clock.now_millis())
    }

    /// Compare-and-transition `Open -> HalfOpen` once `timestamp` reaches
    /// `tripped_at + half_open_timeout`. Returns whether the transition happened; always
    /// `false` (and side-effect free) when not open.
    pub fn should_attempt_reset_at(&self, timestamp: u64) -> bool {
        let mut window = self.lock();
        self.try_half_open(&mut window, timestamp).is_ok()
    }

    /// Decide, under one lock acquisition, whether a monitored call may proceed at
    /// `timestamp`. A due reset probe transitions to `HalfOpen` and admits the call.
    pub fn permit_at(&self, timestamp: u64) -> Result<(), BreakerOpen> {
        if !self.current_state().is_open() {
            return Ok(());
        }
        let mut window = self.lock();
        if !window.state.is_open() {
            return Ok(());
        }
        self.try_half_open(&mut window, timestamp).map_err(BreakerOpen::with_retry_after)
    }

    /// Force the breaker closed and forget all recorded failures.
    ///
    /// Emits `StateChange(old, Closed, None)` if the state changed.
    pub fn reset(&self) {
        let mut window = self.lock();
        window.failures.clear();
        window.tripped_at = None;
        self.publish(&window);
        if window.state != CircuitState::Closed {
            self.transition(&mut window, CircuitState::Closed, None);
        }
    }

    /// `Ok` if the breaker moved to `HalfOpen`, otherwise the remaining cooldown
    /// (zero when not open).
    fn try_half_open(&self, window: &mut Window, timestamp: u64) -> Result<(), Duration> {
        if window.state != CircuitState::Open {
            return Err(Duration::ZERO);
        }
        let due = window.tripped_at.unwrap_or(0).saturating_add(self.cooldown_millis);
        if timestamp < due {
            return Err(Duration::from_millis(due - timestamp));
        }
        window.tripped_at = None;
        self.transition(window, CircuitState::HalfOpen, None);
        Ok(())
    }

    /// Commit `to`, then notify handlers while the lock is still held.
    fn transition(&self, window: &mut Window, to: CircuitState, operation: Option<&OperationId>) {
        let from = window.state;
        window.state = to;
        self.state.store(to.to_u8(), Ordering::Release);
        self.publish(window);

        tracing::info!(
            target: "tripwire::policy",
            old = %from,
            new = %to,
            operation = operation.map(OperationId::as_str),
            failures = window.failures.len(),
            "circuit breaker moving to {}", to
        );

        self.handlers.notify(&StateChange::new(from, to, operation.cloned()));
    }

    /// Mirror the window's counters for lock-free readers. Caller holds the lock.
    fn publish(&self, window: &Window) {
        self.failures.store(window.failures.len(), Ordering::Release);
        self.tripped.store(window.tripped_at.unwrap_or(NOT_TRIPPED), Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        // every critical section leaves the window consistent before notifying
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BreakerPolicy for WindowedPolicy {
    fn record_success(&self, operation: Option<&OperationId>) {
        WindowedPolicy::record_success(self, operation)
    }

    fn record_failure(&self, operation: Option<&OperationId>) {
        WindowedPolicy::record_failure(self, operation)
    }

    fn should_attempt_reset(&self) -> bool {
        WindowedPolicy::should_attempt_reset(self)
    }

    fn current_state(&self) -> CircuitState {
        WindowedPolicy::current_state(self)
    }

    fn permit(&self) -> Result<(), BreakerOpen> {
        self.permit_at(self.clock.now_millis())
    }
}
