//! Operation identifiers, failure classification and the per-capability table.
//!
//! A [`CapabilityDescriptor`] declares the operations of a capability trait and, for the
//! breaker-eligible ones, which [`FailureKind`]s count against the breaker. It is the
//! declarative input to wrapping; [`ClassificationTable::build`] validates it once and
//! flattens it (including every extended capability) into an immutable lookup table.

use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{WrappingError, WrappingErrorReason};

macro_rules! label_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            /// Build from a static string; usable in `const`/`static` items.
            pub const fn from_static(value: &'static str) -> Self {
                Self(Cow::Borrowed(value))
            }

            /// Borrow the label.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&'static str> for $name {
            fn from(value: &'static str) -> Self {
                Self(Cow::Borrowed(value))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(Cow::Owned(value))
            }
        }
    };
}

label_type!(
    /// Stable identifier of one operation on a wrapped capability, e.g. `"Inventory::reserve"`.
    OperationId
);

label_type!(
    /// Classification tag of a failure. Only kinds listed for an operation trip the breaker;
    /// every other failure is an ordinary domain error.
    FailureKind
);

/// Errors that can report which [`FailureKind`] they belong to.
pub trait ClassifyFailure {
    /// Kind used to decide whether this failure counts against the breaker.
    fn failure_kind(&self) -> FailureKind;
}

impl ClassifyFailure for std::io::Error {
    /// Uses the `Debug` name of the [`std::io::ErrorKind`], e.g. `"TimedOut"`.
    fn failure_kind(&self) -> FailureKind {
        FailureKind::from(format!("{:?}", self.kind()))
    }
}

/// Whether a descriptor names an abstract capability or a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    /// A trait-like capability that can be decorated.
    Interface,
    /// A concrete implementation type; cannot be wrapped.
    Concrete,
}

/// Declaration of one operation on a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDecl {
    id: OperationId,
    trips_on: Option<BTreeSet<FailureKind>>,
    raises_breaker_open: bool,
}

impl OperationDecl {
    /// An operation that is not breaker-eligible.
    pub fn new(id: impl Into<OperationId>) -> Self {
        Self { id: id.into(), trips_on: None, raises_breaker_open: false }
    }

    /// An eligible operation that trips on `kinds` and declares the breaker-open signal.
    pub fn guarded<K>(id: impl Into<OperationId>, kinds: impl IntoIterator<Item = K>) -> Self
    where
        K: Into<FailureKind>,
    {
        Self::new(id).trips_on(kinds).raises_breaker_open()
    }

    /// Mark the operation breaker-eligible for the given failure kinds.
    pub fn trips_on<K>(mut self, kinds: impl IntoIterator<Item = K>) -> Self
    where
        K: Into<FailureKind>,
    {
        self.trips_on.get_or_insert_with(BTreeSet::new).extend(kinds.into_iter().map(Into::into));
        self
    }

    /// Declare that the operation's error type can carry [`BreakerOpen`](crate::BreakerOpen).
    pub fn raises_breaker_open(mut self) -> Self {
        self.raises_breaker_open = true;
        self
    }

    /// Operation identifier.
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Whether the operation is breaker-eligible.
    pub fn is_eligible(&self) -> bool {
        self.trips_on.is_some()
    }
}

/// Declared shape of a capability: its operations and the capabilities it extends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDescriptor {
    name: Cow<'static, str>,
    kind: CapabilityKind,
    operations: Vec<OperationDecl>,
    extends: Vec<Arc<CapabilityDescriptor>>,
}

impl CapabilityDescriptor {
    /// Descriptor for an abstract capability.
    pub fn interface(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(name, CapabilityKind::Interface)
    }

    /// Descriptor for a concrete type. Wrapping against it is rejected.
    pub fn concrete(name: impl Into<Cow<'static, str>>) -> Self {
        Self::with_kind(name, CapabilityKind::Concrete)
    }

    fn with_kind(name: impl Into<Cow<'static, str>>, kind: CapabilityKind) -> Self {
        Self { name: name.into(), kind, operations: Vec::new(), extends: Vec::new() }
    }

    /// Declare an operation.
    pub fn operation(mut self, decl: OperationDecl) -> Self {
        self.operations.push(decl);
        self
    }

    /// Inherit every operation of `parent`.
    pub fn extends(mut self, parent: impl Into<Arc<CapabilityDescriptor>>) -> Self {
        self.extends.push(parent.into());
        self
    }

    /// Capability name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Interface or concrete.
    pub fn kind(&self) -> CapabilityKind {
        self.kind
    }

    /// Operations declared directly on this capability.
    pub fn operations(&self) -> &[OperationDecl] {
        &self.operations
    }
}

/// Immutable mapping from eligible operation to the failure kinds that trip the breaker.
///
/// Operations absent from the table are unmonitored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationTable {
    entries: HashMap<OperationId, BTreeSet<FailureKind>>,
}

impl ClassificationTable {
    /// Validate `descriptor` and collect its eligible operations, walking every capability
    /// it extends (each visited once).
    ///
    /// # Errors
    /// - `NotAnInterface` if the descriptor, or anything it extends, is concrete.
    /// - `MissingFailureSignal` if an eligible operation does not declare the breaker-open
    ///   signal.
    pub fn build(descriptor: &CapabilityDescriptor) -> Result<Self, WrappingError> {
        let mut entries: HashMap<OperationId, BTreeSet<FailureKind>> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut pending: Vec<&CapabilityDescriptor> = vec![descriptor];

        while let Some(capability) = pending.pop() {
            if !visited.insert(capability.name()) {
                continue;
            }
            if capability.kind != CapabilityKind::Interface {
                return Err(WrappingError::new(
                    WrappingErrorReason::NotAnInterface,
                    format!("`{}` is not an interface", capability.name()),
                ));
            }

            for op in &capability.operations {
                let Some(kinds) = &op.trips_on else { continue };
                if !op.raises_breaker_open {
                    return Err(WrappingError::new(
                        WrappingErrorReason::MissingFailureSignal,
                        format!(
                            "`{}::{}` must declare the breaker-open signal",
                            capability.name(),
                            op.id
                        ),
                    ));
                }
                entries.entry(op.id.clone()).or_default().extend(kinds.iter().cloned());
            }

            pending.extend(capability.extends.iter().map(Arc::as_ref));
        }

        Ok(Self { entries })
    }

    /// A table with no monitored operations.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether `op` is breaker-eligible.
    pub fn is_monitored(&self, op: &OperationId) -> bool {
        self.entries.contains_key(op)
    }

    /// Failure kinds that trip the breaker for `op`, or `None` if unmonitored.
    pub fn kinds(&self, op: &OperationId) -> Option<&BTreeSet<FailureKind>> {
        self.entries.get(op)
    }

    /// Whether a failure of `kind` from `op` counts against the breaker.
    pub fn classifies(&self, op: &OperationId, kind: &FailureKind) -> bool {
        self.entries.get(op).is_some_and(|kinds| kinds.contains(kind))
    }

    /// Monitored operations, in no particular order.
    pub fn operations(&self) -> impl Iterator<Item = &OperationId> {
        self.entries.keys()
    }

    /// Number of monitored operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is monitored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
