//! Boxed-value unwrapping
//!
//! Native code boxes some scalars as objects (text, type descriptors). Two
//! native boxes holding the same text are two native identities, so each gets
//! its own proxy in the identity cache. Managed callers must see plain values
//! instead, so the proxy is swapped for its payload on the way out; the cache
//! itself keeps storing the proxy.

use crate::object::{downcast_ref, ManagedObject, ManagedRef};
use std::any::{type_name, TypeId};
use std::fmt;
use std::sync::Arc;
use tandem_abi::NativeRef;

/// Kind of a type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Built-in scalar type
    Primitive,
    /// Type described by component metadata
    Metadata,
    /// Type defined by the managed side
    Custom,
}

/// Type descriptor as seen by managed code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeName {
    /// Fully qualified name
    pub name: String,
    /// Kind of type
    pub kind: TypeKind,
}

impl TypeName {
    /// Create a type descriptor
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl ManagedObject for TypeName {}

/// Proxy for a native boxed text value
#[derive(Debug)]
pub struct BoxedText {
    reference: NativeRef,
    value: String,
}

impl BoxedText {
    /// Wrap a native box whose payload has already been read
    pub fn new(reference: NativeRef, value: impl Into<String>) -> Self {
        Self {
            reference,
            value: value.into(),
        }
    }

    /// Payload
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The native box
    pub fn reference(&self) -> &NativeRef {
        &self.reference
    }
}

impl ManagedObject for BoxedText {}

/// Proxy for a native boxed type descriptor
#[derive(Debug)]
pub struct BoxedType {
    reference: NativeRef,
    value: TypeName,
}

impl BoxedType {
    /// Wrap a native box whose payload has already been read
    pub fn new(reference: NativeRef, value: TypeName) -> Self {
        Self { reference, value }
    }

    /// Payload
    pub fn value(&self) -> &TypeName {
        &self.value
    }

    /// The native box
    pub fn reference(&self) -> &NativeRef {
        &self.reference
    }
}

impl ManagedObject for BoxedType {}

type Extractor = Arc<dyn Fn(&dyn ManagedObject) -> Option<ManagedRef> + Send + Sync>;

#[derive(Clone)]
struct UnwrapRule {
    boxed: TypeId,
    boxed_name: &'static str,
    extract: Extractor,
}

/// Ordered set of "boxed proxy type → plain value" rules
#[derive(Clone, Default)]
pub struct UnwrapPolicy {
    rules: Vec<UnwrapRule>,
}

impl UnwrapPolicy {
    /// Policy that never unwraps
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Boxed text → `String`, boxed type descriptor → `TypeName`
    pub fn standard() -> Self {
        Self::empty()
            .with_rule(|boxed: &BoxedText| boxed.value.clone())
            .with_rule(|boxed: &BoxedType| boxed.value.clone())
    }

    /// Add a rule unwrapping proxies of type `B` into values of type `V`
    ///
    /// A later rule for the same boxed type replaces the earlier one.
    pub fn with_rule<B, V, F>(mut self, extract: F) -> Self
    where
        B: ManagedObject,
        V: ManagedObject,
        F: Fn(&B) -> V + Send + Sync + 'static,
    {
        let boxed = TypeId::of::<B>();
        self.rules.retain(|rule| rule.boxed != boxed);
        self.rules.push(UnwrapRule {
            boxed,
            boxed_name: type_name::<B>(),
            extract: Arc::new(move |object: &dyn ManagedObject| {
                downcast_ref::<B>(object).map(|b| Arc::new(extract(b)) as ManagedRef)
            }),
        });
        self
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the policy has no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Swap a boxed proxy for its payload; other objects pass through
    pub fn apply(&self, object: ManagedRef) -> ManagedRef {
        for rule in &self.rules {
            if let Some(value) = (rule.extract)(&*object) {
                tracing::trace!(boxed = rule.boxed_name, "unwrapped boxed value");
                return value;
            }
        }
        object
    }
}

impl fmt::Debug for UnwrapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|rule| rule.boxed_name))
            .finish()
    }
}
