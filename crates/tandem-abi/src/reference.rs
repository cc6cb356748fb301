//! Owning references to native objects
//!
//! `NativeRef` is the managed side's handle on one interface pointer. It owns
//! exactly one native reference: cloning calls `AddRef`, dropping calls
//! `Release`. All other operations go through the object's vtable.

use crate::error::{AbiError, AbiResult};
use crate::guid::Guid;
use crate::hresult::HResult;
use crate::vtable::{
    discovery_vtbl, unknown_vtbl, weak_reference_vtbl, IID_DISCOVERY, IID_IUNKNOWN, IID_WEAK_REFERENCE,
};
use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};

/// Owning reference to a native interface pointer
///
/// # Thread Safety
///
/// Objects of this object model are free-threaded: their reference count and
/// `QueryInterface` may be called from any thread. `NativeRef` is therefore
/// `Send + Sync`.
pub struct NativeRef {
    ptr: NonNull<c_void>,
}

unsafe impl Send for NativeRef {}
unsafe impl Sync for NativeRef {}

impl NativeRef {
    /// Adopt a reference the caller already owns (no `AddRef`)
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live interface pointer carrying one reference
    /// that is transferred to the returned value.
    pub unsafe fn from_raw(ptr: *mut c_void) -> AbiResult<Self> {
        NonNull::new(ptr)
            .map(|ptr| Self { ptr })
            .ok_or(AbiError::NullPointer)
    }

    /// Take a new reference on a borrowed pointer (calls `AddRef`)
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live interface pointer.
    pub unsafe fn from_borrowed(ptr: *mut c_void) -> AbiResult<Self> {
        let this = Self::from_raw(ptr)?;
        (unknown_vtbl(ptr).add_ref)(ptr);
        Ok(this)
    }

    /// The raw interface pointer (still owned by `self`)
    #[inline]
    pub fn as_raw(&self) -> *mut c_void {
        self.ptr.as_ptr()
    }

    /// Give up ownership of the reference without releasing it
    #[inline]
    pub fn into_raw(self) -> *mut c_void {
        let ptr = self.ptr.as_ptr();
        std::mem::forget(self);
        ptr
    }

    /// Ask the object for another interface
    pub fn query_interface(&self, iid: &Guid) -> AbiResult<NativeRef> {
        let mut out: *mut c_void = ptr::null_mut();
        let hr = unsafe { (unknown_vtbl(self.as_raw()).query_interface)(self.as_raw(), iid, &mut out) };
        hr.ok()?;
        // A successful QI hands us an AddRef'd pointer.
        unsafe { NativeRef::from_raw(out) }.map_err(|_| AbiError::Failed(HResult::E_POINTER))
    }

    /// True if the object answers for `iid`
    pub fn supports(&self, iid: &Guid) -> bool {
        self.query_interface(iid).is_ok()
    }

    /// Canonical identity reference (the object's unknown interface)
    ///
    /// Querying any interface of one object for the unknown interface returns
    /// the same pointer, so its address identifies the object.
    pub fn identity(&self) -> AbiResult<NativeRef> {
        self.query_interface(&IID_IUNKNOWN)
    }

    /// Runtime class name reported through the discovery interface
    pub fn runtime_class_name(&self) -> AbiResult<String> {
        let discovery = self.query_interface(&IID_DISCOVERY)?;
        let this = discovery.as_raw();

        let mut name: *const u8 = ptr::null();
        let mut len: usize = 0;
        unsafe { (discovery_vtbl(this).get_runtime_class_name)(this, &mut name, &mut len) }.ok()?;

        if name.is_null() || len == 0 {
            return Ok(String::new());
        }
        // The buffer stays valid while `discovery` is held.
        let bytes = unsafe { std::slice::from_raw_parts(name, len) };
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| AbiError::InvalidUtf8)
    }

    /// Resolve the target of a weak-reference object as interface `iid`
    ///
    /// Returns `Ok(None)` once the target has been destroyed.
    pub fn resolve_weak_reference(&self, iid: &Guid) -> AbiResult<Option<NativeRef>> {
        let weak = self.query_interface(&IID_WEAK_REFERENCE)?;
        let this = weak.as_raw();

        let mut out: *mut c_void = ptr::null_mut();
        unsafe { (weak_reference_vtbl(this).resolve)(this, iid, &mut out) }.ok()?;
        if out.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { NativeRef::from_raw(out) }?))
    }
}

impl Clone for NativeRef {
    fn clone(&self) -> Self {
        unsafe { (unknown_vtbl(self.as_raw()).add_ref)(self.as_raw()) };
        Self { ptr: self.ptr }
    }
}

impl Drop for NativeRef {
    fn drop(&mut self) {
        let remaining = unsafe { (unknown_vtbl(self.as_raw()).release)(self.as_raw()) };
        tracing::trace!(ptr = ?self.ptr, remaining, "released native reference");
    }
}

impl PartialEq for NativeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl Eq for NativeRef {}

impl fmt::Debug for NativeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeRef({:p})", self.ptr)
    }
}
