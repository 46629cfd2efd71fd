//! Tower middleware: the same breaker protocol applied to a `Service`.
//!
//! Requests name the operation they perform through [`Operation`]; the service's own error
//! type classifies failures and carries the breaker-open signal, so wrapping a service
//! leaves its `Response` and `Error` types untouched.
//!
//! ```
//! use std::sync::Arc;
//! use tower::{service_fn, Layer, ServiceExt};
//! use tripwire::{
//!     BreakerOpen, CapabilityDescriptor, CircuitBreakerLayer, ClassifyFailure, FailureKind,
//!     Operation, OperationDecl, OperationId, WindowedPolicy,
//! };
//!
//! static LOOKUP: OperationId = OperationId::from_static("Dns::lookup");
//!
//! struct Lookup(&'static str);
//!
//! impl Operation for Lookup {
//!     fn operation_id(&self) -> &OperationId {
//!         &LOOKUP
//!     }
//! }
//!
//! #[derive(Debug)]
//! enum DnsError {
//!     ServFail,
//!     Open(BreakerOpen),
//! }
//!
//! impl From<BreakerOpen> for DnsError {
//!     fn from(open: BreakerOpen) -> Self {
//!         DnsError::Open(open)
//!     }
//! }
//!
//! impl ClassifyFailure for DnsError {
//!     fn failure_kind(&self) -> FailureKind {
//!         match self {
//!             DnsError::ServFail => FailureKind::from_static("ServFail"),
//!             DnsError::Open(_) => FailureKind::from_static("BreakerOpen"),
//!         }
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let descriptor = CapabilityDescriptor::interface("Dns")
//!     .operation(OperationDecl::guarded(LOOKUP.clone(), ["ServFail"]));
//! let policy = Arc::new(WindowedPolicy::new(1, 30, 60).unwrap());
//! let layer = CircuitBreakerLayer::new(&descriptor, policy).unwrap();
//! let svc = layer.layer(service_fn(|_req: Lookup| async { Err::<u32, _>(DnsError::ServFail) }));
//!
//! assert!(matches!(svc.clone().oneshot(Lookup("a")).await, Err(DnsError::ServFail)));
//! assert!(matches!(svc.oneshot(Lookup("a")).await, Err(DnsError::Open(_))));
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use pin_project::pin_project;
use tower_layer::Layer;
use tower_service::Service;

use crate::classify::{CapabilityDescriptor, ClassificationTable, ClassifyFailure, OperationId};
use crate::error::{BreakerOpen, WrappingError};
use crate::policy::{BreakerPolicy, WindowedPolicy};
use crate::wrapper::record_outcome;

/// Requests that identify the capability operation they perform.
pub trait Operation {
    /// Operation this request performs.
    fn operation_id(&self) -> &OperationId;
}

/// Layer that places services behind a shared [`BreakerPolicy`].
pub struct CircuitBreakerLayer<P = WindowedPolicy> {
    policy: Arc<P>,
    table: Arc<ClassificationTable>,
}

impl<P: BreakerPolicy> CircuitBreakerLayer<P> {
    /// Validate `descriptor` and build the layer.
    ///
    /// # Errors
    /// `NotAnInterface` or `MissingFailureSignal`, as for [`crate::wrap`].
    pub fn new(descriptor: &CapabilityDescriptor, policy: Arc<P>) -> Result<Self, WrappingError> {
        let table = ClassificationTable::build(descriptor).map_err(|error| {
            tracing::warn!(
                target: "tripwire::wrapper",
                capability = descriptor.name(),
                reason = %error.reason(),
                "{}", error.detail()
            );
            error
        })?;
        tracing::debug!(
            target: "tripwire::wrapper",
            capability = descriptor.name(),
            monitored = table.len(),
            "circuit breaker layer ready"
        );
        Ok(Self { policy, table: Arc::new(table) })
    }

    /// The shared policy.
    pub fn policy(&self) -> &Arc<P> {
        &self.policy
    }
}

impl<P> Clone for CircuitBreakerLayer<P> {
    fn clone(&self) -> Self {
        Self { policy: Arc::clone(&self.policy), table: Arc::clone(&self.table) }
    }
}

impl<P: BreakerPolicy> fmt::Debug for CircuitBreakerLayer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerLayer")
            .field("state", &self.policy.current_state())
            .field("monitored", &self.table.len())
            .finish()
    }
}

impl<S, P> Layer<S> for CircuitBreakerLayer<P> {
    type Service = CircuitBreakerService<S, P>;

    fn layer(&self, inner: S) -> Self::Service {
        CircuitBreakerService {
            inner,
            policy: Arc::clone(&self.policy),
            table: Arc::clone(&self.table),
        }
    }
}

/// Service produced by [`CircuitBreakerLayer`].
pub struct CircuitBreakerService<S, P = WindowedPolicy> {
    inner: S,
    policy: Arc<P>,
    table: Arc<ClassificationTable>,
}

impl<S, P> CircuitBreakerService<S, P> {
    /// The shared policy.
    pub fn policy(&self) -> &Arc<P> {
        &self.policy
    }
}

impl<S: Clone, P> Clone for CircuitBreakerService<S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            policy: Arc::clone(&self.policy),
            table: Arc::clone(&self.table),
        }
    }
}

impl<S: fmt::Debug, P: BreakerPolicy> fmt::Debug for CircuitBreakerService<S, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerService")
            .field("inner", &self.inner)
            .field("state", &self.policy.current_state())
            .finish()
    }
}

impl<S, P, Req> Service<Req> for CircuitBreakerService<S, P>
where
    S: Service<Req>,
    S::Error: ClassifyFailure + From<BreakerOpen>,
    P: BreakerPolicy,
    Req: Operation,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, P>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let operation = req.operation_id().clone();
        if !self.table.is_monitored(&operation) {
            tracing::trace!(target: "tripwire::wrapper", operation = %operation, "unmonitored request");
            return ResponseFuture::called(self.inner.call(req), None);
        }
        if let Err(open) = self.policy.permit() {
            tracing::debug!(
                target: "tripwire::wrapper",
                operation = %operation,
                retry_after = ?open.retry_after(),
                "request rejected, circuit open"
            );
            return ResponseFuture::rejected(open);
        }
        let monitor =
            Monitor { policy: Arc::clone(&self.policy), table: Arc::clone(&self.table), operation };
        ResponseFuture::called(self.inner.call(req), Some(monitor))
    }
}

struct Monitor<P> {
    policy: Arc<P>,
    table: Arc<ClassificationTable>,
    operation: OperationId,
}

impl<P: BreakerPolicy> Monitor<P> {
    fn record<R, E: ClassifyFailure>(&self, result: &Result<R, E>) {
        if let Some(kinds) = self.table.kinds(&self.operation) {
            record_outcome(&*self.policy, &self.operation, kinds, result);
        }
    }
}

#[pin_project(project = KindProj)]
enum Kind<F> {
    Called {
        #[pin]
        future: F,
    },
    Rejected {
        open: Option<BreakerOpen>,
    },
}

/// Response future of [`CircuitBreakerService`]. Reports the outcome to the policy when
/// the inner future completes.
#[pin_project]
pub struct ResponseFuture<F, P> {
    #[pin]
    kind: Kind<F>,
    monitor: Option<Monitor<P>>,
}

impl<F, P> ResponseFuture<F, P> {
    fn called(future: F, monitor: Option<Monitor<P>>) -> Self {
        Self { kind: Kind::Called { future }, monitor }
    }

    fn rejected(open: BreakerOpen) -> Self {
        Self { kind: Kind::Rejected { open: Some(open) }, monitor: None }
    }
}

impl<F, P> fmt::Debug for ResponseFuture<F, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            Kind::Called { .. } => "called",
            Kind::Rejected { .. } => "rejected",
        };
        f.debug_struct("ResponseFuture")
            .field("kind", &kind)
            .field("monitored", &self.monitor.is_some())
            .finish()
    }
}

impl<F, P, R, E> Future for ResponseFuture<F, P>
where
    F: Future<Output = Result<R, E>>,
    E: ClassifyFailure + From<BreakerOpen>,
    P: BreakerPolicy,
{
    type Output = Result<R, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.kind.project() {
            KindProj::Rejected { open } => Poll::Ready(Err(E::from(open.take().unwrap_or_default()))),
            KindProj::Called { future } => {
                let result = ready!(future.poll(cx));
                if let Some(monitor) = this.monitor.take() {
                    monitor.record(&result);
                }
                Poll::Ready(result)
            }
        }
    }
}
