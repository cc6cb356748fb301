//! Tandem Runtime - identity and lifetime management for the object-model bridge
//!
//! This crate keeps managed objects and reference-counted native objects in
//! step with each other:
//! - Identity cache: one managed proxy per native object identity
//! - Wrapper registry: one native-callable wrapper (NCW) per managed object
//! - NCW: a native-ABI object with per-interface dispatch headers and an
//!   AddRef/Release/QueryInterface protocol that toggles a strong hold on the
//!   managed object
//! - Cleanup sentinels: finalizers that evict stale cache rows once the
//!   tracked object is gone
//!
//! # Example
//!
//! ```ignore
//! use tandem_runtime::{InteropOptions, InteropRuntime, ProjectionRegistry};
//!
//! let projections = Arc::new(ProjectionRegistry::new());
//! projections.register("Demo.Widget", |reference| Ok(Arc::new(Widget::new(reference)) as ManagedRef));
//!
//! let runtime = InteropRuntime::new(InteropOptions {
//!     resolver: projections,
//!     ..InteropOptions::default()
//! });
//! let proxy = runtime.acquire_proxy(&native_widget)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod defaults;
pub mod finalizer;
pub mod handles;
pub mod identity_cache;
pub mod ncw;
pub mod object;
pub mod options;
pub mod projection;
pub mod runtime;
pub mod unwrap;
pub mod wrapper_registry;

mod sentinel;

pub use finalizer::{FinalizationQueue, FinalizeOutcome, Finalizer, FinalizerStats, PassReport};
pub use handles::{HandleId, HandleTable};
pub use identity_cache::IdentityCache;
pub use ncw::{unknown_vtbl, InterfaceHeader, Ncw};
pub use object::{
    downcast_arc, downcast_ref, CustomQueryResult, ManagedIdentity, ManagedObject, ManagedRef,
    NativeIdentity,
};
pub use options::InteropOptions;
pub use projection::{
    weak_reference_factory, InterfaceEntry, InterfaceTableBuilder, InterfaceTableRegistry,
    ProjectionRegistry, ProxyFactory, TypeInformation, TypeResolver, WeakReferenceProxy,
};
pub use runtime::InteropRuntime;
pub use unwrap::{BoxedText, BoxedType, TypeKind, TypeName, UnwrapPolicy};
pub use wrapper_registry::WrapperRegistry;

pub use tandem_abi::{
    AbiError, Guid, HResult, NativeRef, IID_DISCOVERY, IID_IUNKNOWN, IID_WEAK_REFERENCE,
};

/// Interop errors surfaced to managed callers
#[derive(Debug, thiserror::Error)]
pub enum InteropError {
    /// A call into a native object failed
    #[error(transparent)]
    Abi(#[from] AbiError),

    /// No projection is registered for the object's runtime class
    #[error("No projection registered for runtime class '{0}'")]
    UnresolvedType(String),

    /// The native object answers neither the discovery nor the weak-reference interface
    #[error("Native object exposes no projectable interface")]
    NotProjectable,

    /// The managed object behind a wrapper has been dropped
    #[error("Managed object behind the wrapper has been collected")]
    ObjectCollected,

    /// Release was called on a wrapper whose count is already zero
    #[error("Native-callable wrapper has been over-released")]
    OverRelease,

    /// An interface pointer no longer resolves to a live wrapper
    #[error("Interface pointer refers to a torn-down dispatch table")]
    TornDownTable,

    /// The managed object behind a wrapper is not of the requested type
    #[error("Type mismatch: expected {expected}")]
    TypeMismatch {
        /// Requested type name
        expected: &'static str,
    },

    /// A proxy factory rejected the native object
    #[error("Proxy construction failed: {0}")]
    Factory(String),
}

impl InteropError {
    /// True for errors that indicate a broken native-side contract
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            InteropError::OverRelease | InteropError::TornDownTable | InteropError::ObjectCollected
        )
    }

    /// The status code to report when this error has to cross into native code
    pub fn hresult(&self) -> HResult {
        match self {
            InteropError::Abi(e) => e.hresult(),
            InteropError::UnresolvedType(_) | InteropError::Factory(_) => HResult::E_FAIL,
            InteropError::NotProjectable => HResult::E_NOINTERFACE,
            InteropError::ObjectCollected
            | InteropError::OverRelease
            | InteropError::TornDownTable => HResult::E_UNEXPECTED,
            InteropError::TypeMismatch { .. } => HResult::E_NOINTERFACE,
        }
    }
}

/// Interop result
pub type InteropResult<T> = Result<T, InteropError>;
