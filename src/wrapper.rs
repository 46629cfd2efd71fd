//! Interception wrapper: a decorator that routes every call on a capability through a
//! [`BreakerPolicy`].
//!
//! Rust has no runtime proxies, so the wrapper is explicit. A capability trait is
//! implemented for [`Breaker<Impl>`] by forwarding each method through
//! [`Breaker::invoke`] (fallible operations), [`Breaker::invoke_async`] (async ones) or
//! [`Breaker::delegate`] (operations that cannot fail). Which operations are monitored,
//! and which failure kinds count, comes from the [`CapabilityDescriptor`] validated when
//! the breaker is built.
//!
//! ```
//! use std::sync::Arc;
//! use tripwire::{
//!     BreakerOpen, BreakerPolicy, Breaker, CapabilityDescriptor, ClassifyFailure, FailureKind,
//!     OperationDecl, OperationId, Protectable, WindowedPolicy,
//! };
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     Timeout,
//!     Open(BreakerOpen),
//! }
//!
//! impl From<BreakerOpen> for FetchError {
//!     fn from(open: BreakerOpen) -> Self {
//!         FetchError::Open(open)
//!     }
//! }
//!
//! impl ClassifyFailure for FetchError {
//!     fn failure_kind(&self) -> FailureKind {
//!         match self {
//!             FetchError::Timeout => FailureKind::from_static("Timeout"),
//!             FetchError::Open(_) => FailureKind::from_static("BreakerOpen"),
//!         }
//!     }
//! }
//!
//! trait Fetcher {
//!     fn fetch(&self, key: &str) -> Result<String, FetchError>;
//! }
//!
//! struct Http;
//! impl Protectable for Http {}
//! impl Fetcher for Http {
//!     fn fetch(&self, _key: &str) -> Result<String, FetchError> {
//!         Err(FetchError::Timeout)
//!     }
//! }
//!
//! const FETCH: OperationId = OperationId::from_static("Fetcher::fetch");
//!
//! impl<T: Fetcher, P: BreakerPolicy> Fetcher for Breaker<T, P> {
//!     fn fetch(&self, key: &str) -> Result<String, FetchError> {
//!         self.invoke(&FETCH, |inner| inner.fetch(key))
//!     }
//! }
//!
//! let descriptor = CapabilityDescriptor::interface("Fetcher")
//!     .operation(OperationDecl::guarded(FETCH, ["Timeout"]));
//! let policy = Arc::new(WindowedPolicy::new(1, 30, 60).unwrap());
//! let fetcher = tripwire::wrap(Http, &descriptor, policy).unwrap();
//!
//! assert!(matches!(fetcher.fetch("a"), Err(FetchError::Timeout)));
//! assert!(matches!(fetcher.fetch("a"), Err(FetchError::Open(_))));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::classify::{CapabilityDescriptor, ClassificationTable, ClassifyFailure, FailureKind, OperationId};
use crate::error::{BreakerOpen, WrappingError, WrappingErrorReason};
use crate::policy::{BreakerPolicy, WindowedPolicy};
use crate::state::CircuitState;

/// Identity of one [`Breaker`] instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakerMarker(u64);

impl BreakerMarker {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BreakerMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "breaker-{}", self.0)
    }
}

/// Targets that can be placed behind a breaker.
///
/// Plain implementations use the default (`impl Protectable for MyStore {}`). Only
/// [`Breaker`] reports a marker, which is how a second wrap of the same instance is refused.
pub trait Protectable {
    /// `Some` if this value is already a breaker-wrapped instance.
    fn breaker_marker(&self) -> Option<BreakerMarker> {
        None
    }
}

impl<T: Protectable + ?Sized> Protectable for &T {
    fn breaker_marker(&self) -> Option<BreakerMarker> {
        (**self).breaker_marker()
    }
}

impl<T: Protectable + ?Sized> Protectable for Box<T> {
    fn breaker_marker(&self) -> Option<BreakerMarker> {
        (**self).breaker_marker()
    }
}

impl<T: Protectable + ?Sized> Protectable for Arc<T> {
    fn breaker_marker(&self) -> Option<BreakerMarker> {
        (**self).breaker_marker()
    }
}

/// A capability implementation guarded by a shared [`BreakerPolicy`].
///
/// Holds the target, the policy, the classification table and its own marker; nothing
/// else. The policy lock is never held while the target runs.
pub struct Breaker<T, P: ?Sized = WindowedPolicy> {
    target: T,
    policy: Arc<P>,
    table: Arc<ClassificationTable>,
    marker: BreakerMarker,
}

impl<T, P> Breaker<T, P>
where
    T: Protectable,
    P: BreakerPolicy + ?Sized,
{
    /// Start a wrap request.
    pub fn builder<'d>() -> BreakerBuilder<'d, T, P> {
        BreakerBuilder::new()
    }
}

impl<T, P> Breaker<T, P>
where
    P: BreakerPolicy + ?Sized,
{
    /// Run a fallible operation through the breaker.
    ///
    /// For a monitored `operation`: returns `E::from(BreakerOpen)` without calling the
    /// target when the policy refuses; otherwise reports the outcome (success, or a
    /// failure whose kind is listed for the operation). The target's result is always
    /// returned unchanged. Unmonitored operations run with no policy interaction.
    pub fn invoke<R, E, F>(&self, operation: &OperationId, call: F) -> Result<R, E>
    where
        F: FnOnce(&T) -> Result<R, E>,
        E: From<BreakerOpen> + ClassifyFailure,
    {
        let Some(kinds) = self.table.kinds(operation) else {
            tracing::trace!(target: "tripwire::wrapper", operation = %operation, "unmonitored call");
            return call(&self.target);
        };
        self.admit(operation)?;
        let result = call(&self.target);
        record_outcome(&*self.policy, operation, kinds, &result);
        result
    }

    /// Async form of [`Breaker::invoke`]. Nothing runs until the returned future is first
    /// polled; the admission check then happens before `call` is invoked, and the outcome
    /// is recorded once the call's future resolves.
    pub async fn invoke_async<'a, R, E, F, Fut>(
        &'a self,
        operation: &OperationId,
        call: F,
    ) -> Result<R, E>
    where
        F: FnOnce(&'a T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<BreakerOpen> + ClassifyFailure,
    {
        let Some(kinds) = self.table.kinds(operation) else {
            tracing::trace!(target: "tripwire::wrapper", operation = %operation, "unmonitored call");
            return call(&self.target).await;
        };
        self.admit(operation)?;
        let result = call(&self.target).await;
        record_outcome(&*self.policy, operation, kinds, &result);
        result
    }

    /// Pass-through for operations that cannot fail.
    pub fn delegate<R, F>(&self, call: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        call(&self.target)
    }

    /// The wrapped implementation.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// The shared policy.
    pub fn policy(&self) -> &Arc<P> {
        &self.policy
    }

    /// Monitored operations and their failure kinds.
    pub fn table(&self) -> &ClassificationTable {
        &self.table
    }

    /// Identity of this breaker.
    pub fn marker(&self) -> BreakerMarker {
        self.marker
    }

    /// Current policy state.
    pub fn state(&self) -> CircuitState {
        self.policy.current_state()
    }

    fn admit(&self, operation: &OperationId) -> Result<(), BreakerOpen> {
        self.policy.permit().map_err(|open| {
            tracing::debug!(
                target: "tripwire::wrapper",
                operation = %operation,
                breaker = %self.marker,
                retry_after = ?open.retry_after(),
                "call rejected, circuit open"
            );
            open
        })
    }
}

/// Report a monitored call's outcome to `policy`.
pub(crate) fn record_outcome<P, R, E>(
    policy: &P,
    operation: &OperationId,
    kinds: &BTreeSet<FailureKind>,
    result: &Result<R, E>,
) where
    P: BreakerPolicy + ?Sized,
    E: ClassifyFailure,
{
    match result {
        Ok(_) => {
            tracing::trace!(target: "tripwire::wrapper", operation = %operation, "call succeeded");
            policy.record_success(Some(operation));
        }
        Err(error) => {
            let kind = error.failure_kind();
            let counted = kinds.contains(&kind);
            tracing::trace!(
                target: "tripwire::wrapper",
                operation = %operation,
                kind = %kind,
                counted,
                "call failed"
            );
            if counted {
                policy.record_failure(Some(operation));
            }
        }
    }
}

impl<T, P: ?Sized> Protectable for Breaker<T, P> {
    fn breaker_marker(&self) -> Option<BreakerMarker> {
        Some(self.marker)
    }
}

impl<T: Clone, P: ?Sized> Clone for Breaker<T, P> {
    /// Clones share the policy, the table and the marker.
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            policy: Arc::clone(&self.policy),
            table: Arc::clone(&self.table),
            marker: self.marker,
        }
    }
}

impl<T, P> fmt::Debug for Breaker<T, P>
where
    T: fmt::Debug,
    P: BreakerPolicy + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("target", &self.target)
            .field("state", &self.policy.current_state())
            .field("monitored", &self.table.len())
            .field("marker", &self.marker)
            .finish()
    }
}

/// Collects the parts of a wrap request; see [`Breaker::builder`].
pub struct BreakerBuilder<'d, T, P: ?Sized = WindowedPolicy> {
    target: Option<T>,
    capability: Option<&'d CapabilityDescriptor>,
    policy: Option<Arc<P>>,
}

impl<'d, T, P> BreakerBuilder<'d, T, P>
where
    T: Protectable,
    P: BreakerPolicy + ?Sized,
{
    fn new() -> Self {
        Self { target: None, capability: None, policy: None }
    }

    /// Implementation to guard.
    pub fn target(mut self, target: T) -> Self {
        self.target = Some(target);
        self
    }

    /// Declared capability the target is used through.
    pub fn capability(mut self, descriptor: &'d CapabilityDescriptor) -> Self {
        self.capability = Some(descriptor);
        self
    }

    /// Policy shared by every breaker guarding the same resource.
    pub fn policy(mut self, policy: Arc<P>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validate the request and produce the breaker.
    ///
    /// # Errors
    /// [`WrappingError`] with reason `NilTarget`, `NilPolicy`, `NotAnInterface`,
    /// `AlreadyWrapped` or `MissingFailureSignal`. Nothing is produced on error.
    pub fn build(self) -> Result<Breaker<T, P>, WrappingError> {
        let capability = self.capability.map(CapabilityDescriptor::name).unwrap_or("-").to_owned();
        let result = self.assemble();
        match &result {
            Ok(breaker) => tracing::debug!(
                target: "tripwire::wrapper",
                capability = %capability,
                monitored = breaker.table.len(),
                breaker = %breaker.marker,
                "wrapped capability in circuit breaker"
            ),
            Err(error) => tracing::warn!(
                target: "tripwire::wrapper",
                capability = %capability,
                reason = %error.reason(),
                "{}", error.detail()
            ),
        }
        result
    }

    fn assemble(self) -> Result<Breaker<T, P>, WrappingError> {
        let target = self.target.ok_or_else(|| {
            WrappingError::new(WrappingErrorReason::NilTarget, "no target implementation supplied")
        })?;
        let policy = self.policy.ok_or_else(|| {
            WrappingError::new(WrappingErrorReason::NilPolicy, "no circuit breaker policy supplied")
        })?;
        let capability = self.capability.ok_or_else(|| {
            WrappingError::new(WrappingErrorReason::NotAnInterface, "no capability descriptor supplied")
        })?;
        if let Some(marker) = target.breaker_marker() {
            return Err(WrappingError::new(
                WrappingErrorReason::AlreadyWrapped,
                format!("`{}` target is already guarded by {}", capability.name(), marker),
            ));
        }
        let table = ClassificationTable::build(capability)?;

        Ok(Breaker { target, policy, table: Arc::new(table), marker: BreakerMarker::next() })
    }
}

impl<T, P: ?Sized> fmt::Debug for BreakerBuilder<'_, T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerBuilder")
            .field("target", &self.target.is_some())
            .field("capability", &self.capability.map(CapabilityDescriptor::name))
            .field("policy", &self.policy.is_some())
            .finish()
    }
}

/// Wrap `target` in a breaker for `capability`, sharing `policy`.
///
/// One-call form of [`Breaker::builder`].
pub fn wrap<T, P>(
    target: T,
    capability: &CapabilityDescriptor,
    policy: Arc<P>,
) -> Result<Breaker<T, P>, WrappingError>
where
    T: Protectable,
    P: BreakerPolicy + ?Sized,
{
    Breaker::builder().target(target).capability(capability).policy(policy).build()
}
