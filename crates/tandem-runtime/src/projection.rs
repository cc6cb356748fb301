//! Projection collaborators
//!
//! Two lookups sit outside the identity core and are reached through traits:
//! - [`TypeResolver`]: runtime class name → factory building the managed proxy
//! - [`InterfaceTableBuilder`]: managed object → the native interfaces its
//!   wrapper answers for
//!
//! [`ProjectionRegistry`] and [`InterfaceTableRegistry`] are the registry-backed
//! implementations that generated projection code fills in at startup.

use crate::object::{ManagedObject, ManagedRef};
use crate::InteropResult;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use tandem_abi::{Guid, NativeRef};

/// Builds a managed proxy around a native object's identity reference
pub type ProxyFactory = Arc<dyn Fn(NativeRef) -> InteropResult<ManagedRef> + Send + Sync>;

/// Maps runtime class names to proxy factories
///
/// Called while a proxy is being acquired for that class; implementations
/// must not acquire proxies themselves.
pub trait TypeResolver: Send + Sync {
    /// Factory for `runtime_class_name`, if the class is projected
    fn resolve(&self, runtime_class_name: &str) -> Option<ProxyFactory>;
}

/// Managed stand-in for a native object that only answers the weak-reference
/// interface
#[derive(Debug)]
pub struct WeakReferenceProxy {
    reference: NativeRef,
}

impl WeakReferenceProxy {
    /// Wrap the weak-reference interface of a native object
    pub fn new(reference: NativeRef) -> Self {
        Self { reference }
    }

    /// The weak-reference interface pointer
    pub fn reference(&self) -> &NativeRef {
        &self.reference
    }

    /// Resolve the target as interface `iid`; `None` once it is gone
    pub fn resolve(&self, iid: &Guid) -> InteropResult<Option<NativeRef>> {
        Ok(self.reference.resolve_weak_reference(iid)?)
    }
}

impl ManagedObject for WeakReferenceProxy {}

/// Default factory for objects that answer the weak-reference interface but
/// not the discovery interface
pub fn weak_reference_factory() -> ProxyFactory {
    Arc::new(|reference| Ok(Arc::new(WeakReferenceProxy::new(reference)) as ManagedRef))
}

/// Registry of proxy factories keyed by runtime class name
#[derive(Default)]
pub struct ProjectionRegistry {
    factories: DashMap<String, ProxyFactory>,
}

static GLOBAL_PROJECTIONS: Lazy<Arc<ProjectionRegistry>> =
    Lazy::new(|| Arc::new(ProjectionRegistry::new()));

impl ProjectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Process-wide registry used by the default runtime options
    pub fn global() -> Arc<ProjectionRegistry> {
        GLOBAL_PROJECTIONS.clone()
    }

    /// Register (or replace) the factory for a runtime class
    pub fn register<F>(&self, runtime_class_name: impl Into<String>, factory: F)
    where
        F: Fn(NativeRef) -> InteropResult<ManagedRef> + Send + Sync + 'static,
    {
        let name = runtime_class_name.into();
        tracing::trace!(class = %name, "registered projection");
        self.factories.insert(name, Arc::new(factory));
    }

    /// Remove a runtime class
    pub fn unregister(&self, runtime_class_name: &str) -> bool {
        self.factories.remove(runtime_class_name).is_some()
    }

    /// Number of registered classes
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl TypeResolver for ProjectionRegistry {
    fn resolve(&self, runtime_class_name: &str) -> Option<ProxyFactory> {
        self.factories
            .get(runtime_class_name)
            .map(|entry| entry.value().clone())
    }
}

impl fmt::Debug for ProjectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProjectionRegistry")
            .field("classes", &self.factories.len())
            .finish()
    }
}

/// One interface a wrapper answers for
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InterfaceEntry {
    /// Interface id
    pub iid: Guid,
    vtable: NonNull<c_void>,
}

// Vtables are immutable statics of function pointers.
unsafe impl Send for InterfaceEntry {}
unsafe impl Sync for InterfaceEntry {}

impl InterfaceEntry {
    /// Entry for a static vtable
    ///
    /// The vtable must begin with the unknown-interface slots of the
    /// wrapper (see [`unknown_vtbl`](crate::unknown_vtbl)).
    pub fn new<V>(iid: Guid, vtable: &'static V) -> Self {
        Self {
            iid,
            vtable: NonNull::from(vtable).cast(),
        }
    }

    /// Vtable pointer stored in the dispatch header
    pub fn vtable(&self) -> *const c_void {
        self.vtable.as_ptr()
    }
}

impl fmt::Debug for InterfaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InterfaceEntry({}, {:p})", self.iid, self.vtable)
    }
}

/// What a wrapper needs to know about the managed object's type
#[derive(Debug, Clone, Default)]
pub struct TypeInformation {
    /// Name reported by the discovery interface
    pub runtime_class_name: String,
    /// Interfaces beyond the two mandatory ones
    pub interfaces: Vec<InterfaceEntry>,
}

impl TypeInformation {
    /// Type information with a class name and no extra interfaces
    pub fn named(runtime_class_name: impl Into<String>) -> Self {
        Self {
            runtime_class_name: runtime_class_name.into(),
            interfaces: Vec::new(),
        }
    }

    /// Add an interface
    pub fn with_interface<V>(mut self, iid: Guid, vtable: &'static V) -> Self {
        self.interfaces.push(InterfaceEntry::new(iid, vtable));
        self
    }
}

/// Enumerates the native interfaces a managed object answers for
pub trait InterfaceTableBuilder: Send + Sync {
    /// Type information for `object`
    fn type_information(&self, object: &dyn ManagedObject) -> TypeInformation;
}

/// Registry of per-type interface tables
#[derive(Default)]
pub struct InterfaceTableRegistry {
    tables: DashMap<TypeId, TypeInformation>,
}

static GLOBAL_INTERFACE_TABLES: Lazy<Arc<InterfaceTableRegistry>> =
    Lazy::new(|| Arc::new(InterfaceTableRegistry::new()));

impl InterfaceTableRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Process-wide registry used by the default runtime options
    pub fn global() -> Arc<InterfaceTableRegistry> {
        GLOBAL_INTERFACE_TABLES.clone()
    }

    /// Register the interface table for managed type `T`
    pub fn register<T: ManagedObject>(&self, info: TypeInformation) {
        self.tables.insert(TypeId::of::<T>(), info);
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl InterfaceTableBuilder for InterfaceTableRegistry {
    fn type_information(&self, object: &dyn ManagedObject) -> TypeInformation {
        let any: &dyn Any = object;
        self.tables
            .get(&any.type_id())
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

impl fmt::Debug for InterfaceTableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceTableRegistry")
            .field("types", &self.tables.len())
            .finish()
    }
}
