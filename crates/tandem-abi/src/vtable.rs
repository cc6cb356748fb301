//! Fixed vtable layouts of the two mandatory interfaces
//!
//! Every native object starts with a pointer to its vtable. The first three
//! slots of every vtable are the unknown interface; the discovery interface
//! appends a single slot that reports the object's runtime class name.
//!
//! ```text
//! object ──► ┌──────────────┐      ┌─────────────────────────┐
//!            │ vtable ptr   │ ───► │ query_interface         │
//!            ├──────────────┤      │ add_ref                 │
//!            │ (private)    │      │ release                 │
//!            └──────────────┘      │ get_runtime_class_name  │ (discovery only)
//!                                  └─────────────────────────┘
//! ```

use crate::guid::Guid;
use crate::hresult::HResult;
use std::ffi::c_void;

/// Interface id of the unknown interface
pub const IID_IUNKNOWN: Guid = Guid::from_u128(0x00000000_0000_0000_c000_000000000046);

/// Interface id of the discovery interface
pub const IID_DISCOVERY: Guid = Guid::from_u128(0xaf86e2e0_b12d_4c6a_9c5a_d7aa65101e90);

/// Interface id of the weak-reference interface
///
/// Objects that do not answer the discovery interface may still answer this
/// one; it has a single extra slot that resolves the referenced object.
pub const IID_WEAK_REFERENCE: Guid = Guid::from_u128(0x00000037_0000_0000_c000_000000000046);

/// `QueryInterface(this, iid, out) -> status`
pub type QueryInterfaceFn =
    unsafe extern "system" fn(this: *mut c_void, iid: *const Guid, out: *mut *mut c_void) -> HResult;

/// `AddRef(this) -> count` and `Release(this) -> count`
pub type RefCountFn = unsafe extern "system" fn(this: *mut c_void) -> u32;

/// `GetRuntimeClassName(this, out_ptr, out_len) -> status`
///
/// The returned UTF-8 buffer is owned by the object and remains valid while
/// the caller holds a reference to it.
pub type GetRuntimeClassNameFn =
    unsafe extern "system" fn(this: *mut c_void, name: *mut *const u8, len: *mut usize) -> HResult;

/// Unknown interface vtable (3 slots)
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IUnknownVtbl {
    /// Slot 0
    pub query_interface: QueryInterfaceFn,
    /// Slot 1
    pub add_ref: RefCountFn,
    /// Slot 2
    pub release: RefCountFn,
}

/// Discovery interface vtable (unknown + 1 slot)
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IDiscoveryVtbl {
    /// Slots 0..3
    pub base: IUnknownVtbl,
    /// Slot 3
    pub get_runtime_class_name: GetRuntimeClassNameFn,
}

/// Weak-reference interface vtable (unknown + 1 slot)
#[repr(C)]
#[derive(Clone, Copy)]
pub struct IWeakReferenceVtbl {
    /// Slots 0..3
    pub base: IUnknownVtbl,
    /// Slot 3: `Resolve(this, iid, out)`; succeeds with a null `out` once the
    /// target is gone
    pub resolve: QueryInterfaceFn,
}

/// Read the vtable pointer of a native object
///
/// # Safety
///
/// `this` must point to a live object whose first field is a pointer to a
/// vtable beginning with [`IUnknownVtbl`].
#[inline]
pub unsafe fn unknown_vtbl<'a>(this: *mut c_void) -> &'a IUnknownVtbl {
    &**(this as *const *const IUnknownVtbl)
}

/// Read the vtable pointer of a discovery interface pointer
///
/// # Safety
///
/// `this` must be an interface pointer obtained by querying for
/// [`IID_DISCOVERY`].
#[inline]
pub unsafe fn discovery_vtbl<'a>(this: *mut c_void) -> &'a IDiscoveryVtbl {
    &**(this as *const *const IDiscoveryVtbl)
}

/// Read the vtable pointer of a weak-reference interface pointer
///
/// # Safety
///
/// `this` must be an interface pointer obtained by querying for
/// [`IID_WEAK_REFERENCE`].
#[inline]
pub unsafe fn weak_reference_vtbl<'a>(this: *mut c_void) -> &'a IWeakReferenceVtbl {
    &**(this as *const *const IWeakReferenceVtbl)
}
