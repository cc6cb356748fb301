//! Tandem ABI - the binary vocabulary shared with native components
//!
//! This crate contains the types that describe the native object model
//! without any runtime state:
//! - `Guid` interface identifiers and `HResult` status codes
//! - The fixed vtable layouts of the unknown and discovery interfaces
//! - `NativeRef`, an owning reference to a native interface pointer
//!
//! The identity caches and the native-callable wrapper live in
//! `tandem-runtime`.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod guid;
mod hresult;
mod reference;
pub mod vtable;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{AbiError, AbiResult};
pub use guid::{Guid, ParseGuidError};
pub use hresult::HResult;
pub use reference::NativeRef;
pub use vtable::{
    GetRuntimeClassNameFn, IDiscoveryVtbl, IUnknownVtbl, IWeakReferenceVtbl, QueryInterfaceFn,
    RefCountFn, IID_DISCOVERY, IID_IUNKNOWN, IID_WEAK_REFERENCE,
};
