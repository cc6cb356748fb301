//! Runtime configuration

use crate::defaults::DEFAULT_FINALIZER_THRESHOLD;
use crate::projection::{
    weak_reference_factory, InterfaceTableBuilder, InterfaceTableRegistry, ProjectionRegistry,
    ProxyFactory, TypeResolver,
};
use crate::unwrap::UnwrapPolicy;
use std::fmt;
use std::sync::Arc;

/// Configuration for an [`InteropRuntime`](crate::InteropRuntime)
#[derive(Clone)]
pub struct InteropOptions {
    /// Run a finalization pass after this many sentinel registrations
    /// (`None` = only when `run_finalizers` is called)
    pub finalizer_threshold: Option<usize>,

    /// Maps runtime class names to proxy factories
    pub resolver: Arc<dyn TypeResolver>,

    /// Builds proxies for objects that answer the weak-reference interface
    /// but not the discovery interface
    pub weak_reference_factory: ProxyFactory,

    /// Enumerates the interfaces a managed object exposes to native callers
    pub interface_builder: Arc<dyn InterfaceTableBuilder>,

    /// Boxed-value unwrapping applied when a proxy is handed out
    pub unwrap_policy: UnwrapPolicy,
}

impl Default for InteropOptions {
    fn default() -> Self {
        Self {
            finalizer_threshold: Some(DEFAULT_FINALIZER_THRESHOLD),
            resolver: ProjectionRegistry::global(),
            weak_reference_factory: weak_reference_factory(),
            interface_builder: InterfaceTableRegistry::global(),
            unwrap_policy: UnwrapPolicy::standard(),
        }
    }
}

impl InteropOptions {
    /// Set the finalization threshold
    pub fn with_finalizer_threshold(mut self, threshold: Option<usize>) -> Self {
        self.finalizer_threshold = threshold;
        self
    }

    /// Set the type resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn TypeResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set the factory used for weak-reference-only objects
    pub fn with_weak_reference_factory(mut self, factory: ProxyFactory) -> Self {
        self.weak_reference_factory = factory;
        self
    }

    /// Set the interface table builder
    pub fn with_interface_builder(mut self, builder: Arc<dyn InterfaceTableBuilder>) -> Self {
        self.interface_builder = builder;
        self
    }

    /// Set the unwrap policy
    pub fn with_unwrap_policy(mut self, policy: UnwrapPolicy) -> Self {
        self.unwrap_policy = policy;
        self
    }
}

impl fmt::Debug for InteropOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteropOptions")
            .field("finalizer_threshold", &self.finalizer_threshold)
            .field("unwrap_policy", &self.unwrap_policy)
            .finish_non_exhaustive()
    }
}
