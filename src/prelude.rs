//! Convenient re-exports for common Tripwire types.
pub use crate::{
    classify::{CapabilityDescriptor, ClassifyFailure, FailureKind, OperationDecl, OperationId},
    error::{BreakerOpen, ConfigError, WrappingError, WrappingErrorReason},
    layer::{CircuitBreakerLayer, Operation},
    notify::{LogHandler, StateChange, StateChangeHandler},
    policy::{BreakerPolicy, WindowedPolicy},
    wrapper::{wrap, Breaker, Protectable},
    CircuitState, PolicyConfig,
};
