#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Tripwire
//!
//! A windowed circuit breaker that transparently guards trait implementations.
//!
//! ## Features
//!
//! - **Windowed policy**: trips after `trip_threshold` classified failures inside a sliding
//!   `threshold_window`, probes again after `half_open_timeout`
//! - **Declarative classification**: a [`CapabilityDescriptor`] lists which operations are
//!   monitored and which failure kinds count against the breaker
//! - **Interception wrapper**: [`Breaker`] forwards calls unchanged, short-circuiting
//!   monitored operations with [`BreakerOpen`] while the circuit is open
//! - **State-change handlers** run in attachment order with isolated delivery
//! - **Tower middleware** via [`CircuitBreakerLayer`]
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tripwire::{CapabilityDescriptor, LogHandler, OperationDecl, WindowedPolicy};
//!
//! // 3 failures within 60s trip the breaker; retry after 30s.
//! let policy = Arc::new(WindowedPolicy::new(3, 30, 60).unwrap());
//! policy.attach_handler(Arc::new(LogHandler));
//!
//! let descriptor = CapabilityDescriptor::interface("Inventory")
//!     .operation(OperationDecl::guarded("Inventory::reserve", ["Timeout", "Unavailable"]))
//!     .operation(OperationDecl::new("Inventory::name"));
//! # struct Warehouse;
//! # impl tripwire::Protectable for Warehouse {}
//! let inventory = tripwire::wrap(Warehouse, &descriptor, policy).unwrap();
//! assert!(inventory.table().is_monitored(&"Inventory::reserve".into()));
//! ```
//!
//! See [`wrapper`] for implementing a capability trait on [`Breaker`].

pub mod classify;
pub mod clock;
pub mod config;
pub mod error;
pub mod layer;
pub mod notify;
pub mod policy;
pub mod prelude;
pub mod state;
pub mod wrapper;

// Re-exports
pub use classify::{
    CapabilityDescriptor, CapabilityKind, ClassificationTable, ClassifyFailure, FailureKind,
    OperationDecl, OperationId,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{PolicyConfig, PolicyConfigBuilder};
pub use error::{BreakerOpen, ConfigError, WrappingError, WrappingErrorReason};
pub use layer::{CircuitBreakerLayer, CircuitBreakerService, Operation, ResponseFuture};
pub use notify::{
    BroadcastHandler, FnHandler, HandlerError, HandlerSet, LogHandler, MemoryHandler,
    StateChange, StateChangeHandler,
};
pub use policy::{BreakerPolicy, WindowedPolicy};
pub use state::CircuitState;
pub use wrapper::{wrap, Breaker, BreakerBuilder, BreakerMarker, Protectable};
