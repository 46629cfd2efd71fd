//! Error types for breaker construction, wrapping and call rejection.
use std::fmt;
use std::time::Duration;

/// Invalid policy parameters. Raised at construction, never recovered internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Trip threshold must be > 0.
    #[error("trip_threshold must be > 0 (got {provided})")]
    InvalidTripThreshold {
        /// Value provided by caller.
        provided: u32,
    },
    /// Failure window must be at least one second.
    #[error("threshold_window must be at least 1s (got {0:?})")]
    InvalidThresholdWindow(Duration),
    /// Half-open cooldown must be at least one second.
    #[error("half_open_timeout must be at least 1s (got {0:?})")]
    InvalidHalfOpenTimeout(Duration),
}

/// Why a wrap request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrappingErrorReason {
    /// No target implementation was supplied.
    NilTarget,
    /// No policy was supplied.
    NilPolicy,
    /// The capability descriptor is missing or describes a concrete type.
    NotAnInterface,
    /// A breaker-eligible operation does not declare the breaker-open signal.
    MissingFailureSignal,
    /// The target is itself a breaker-wrapped instance.
    AlreadyWrapped,
}

impl fmt::Display for WrappingErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WrappingErrorReason::NilTarget => "nil target",
            WrappingErrorReason::NilPolicy => "nil policy",
            WrappingErrorReason::NotAnInterface => "not an interface",
            WrappingErrorReason::MissingFailureSignal => "missing failure signal",
            WrappingErrorReason::AlreadyWrapped => "already wrapped",
        };
        f.write_str(label)
    }
}

/// A malformed wrap request. No partial wrapper is ever produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot wrap in circuit breaker ({reason}): {detail}")]
pub struct WrappingError {
    reason: WrappingErrorReason,
    detail: String,
}

impl WrappingError {
    pub(crate) fn new(reason: WrappingErrorReason, detail: impl Into<String>) -> Self {
        Self { reason, detail: detail.into() }
    }

    /// Machine-readable rejection reason.
    pub fn reason(&self) -> WrappingErrorReason {
        self.reason
    }

    /// Human-readable detail naming the offending capability or operation.
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// Returned instead of delegating while the breaker is open and a reset is not yet due.
///
/// Wrapped operations surface it through their own error type (`E: From<BreakerOpen>`),
/// so callers can tell a breaker rejection apart from a genuine domain failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BreakerOpen {
    retry_after: Option<Duration>,
}

impl BreakerOpen {
    /// Rejection without a cooldown hint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejection carrying the remaining cooldown.
    pub fn with_retry_after(retry_after: Duration) -> Self {
        Self { retry_after: Some(retry_after) }
    }

    /// Time left until the policy will allow a reset attempt, if known.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

impl fmt::Display for BreakerOpen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.retry_after {
            Some(wait) => write!(f, "circuit breaker open (reset attempt in {:?})", wait),
            None => write!(f, "circuit breaker open"),
        }
    }
}

impl std::error::Error for BreakerOpen {}
