//! Native dispatch headers and ABI entry points
//!
//! Each interface a wrapper answers for gets its own heap-allocated header:
//!
//! ```text
//! interface pointer ──► ┌──────────────────┐
//!                       │ vtable ptr       │ ──► static vtable (QI/AddRef/Release/...)
//!                       ├──────────────────┤
//!                       │ weak handle id   │ ──► HandleTable<Ncw> ──► Ncw
//!                       └──────────────────┘
//! ```
//!
//! All headers of one wrapper share the same weak handle, so any interface
//! pointer recovers the same `Ncw`. Headers live until the wrapper is dropped.

use super::{ncw_handles, Ncw};
use crate::handles::HandleId;
use crate::projection::InterfaceEntry;
use crate::{InteropError, InteropResult};
use rustc_hash::FxHasher;
use std::collections::HashMap;
use std::ffi::c_void;
use std::hash::BuildHasherDefault;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use std::sync::Arc;
use tandem_abi::{Guid, HResult, IDiscoveryVtbl, IUnknownVtbl, IID_DISCOVERY, IID_IUNKNOWN};

/// Fixed-layout header behind every interface pointer handed to native code
#[repr(C)]
pub struct InterfaceHeader {
    vtable: *const c_void,
    handle: u64,
}

impl InterfaceHeader {
    /// Vtable this interface dispatches through
    pub fn vtable(&self) -> *const c_void {
        self.vtable
    }

    /// Weak handle of the owning wrapper
    pub fn handle(&self) -> HandleId {
        HandleId::from_u64(self.handle)
    }
}

/// Interface id → header, immutable after construction
pub(crate) struct DispatchTable {
    headers: HashMap<Guid, NonNull<InterfaceHeader>, BuildHasherDefault<FxHasher>>,
    order: Vec<Guid>,
    identity: NonNull<InterfaceHeader>,
}

// Headers are written once in `build` and only read afterwards.
unsafe impl Send for DispatchTable {}
unsafe impl Sync for DispatchTable {}

impl DispatchTable {
    /// Allocate headers for `entries` followed by the unknown and discovery
    /// interfaces; the first entry for an interface id wins
    pub(crate) fn build(entries: &[InterfaceEntry], handle: HandleId) -> Self {
        let mandatory = [
            InterfaceEntry::new(IID_IUNKNOWN, &UNKNOWN_VTBL),
            InterfaceEntry::new(IID_DISCOVERY, &DISCOVERY_VTBL),
        ];

        let mut headers: HashMap<Guid, NonNull<InterfaceHeader>, BuildHasherDefault<FxHasher>> =
            HashMap::default();
        let mut order = Vec::with_capacity(entries.len() + mandatory.len());
        for entry in entries.iter().chain(mandatory.iter()) {
            if headers.contains_key(&entry.iid) {
                continue;
            }
            let header = Box::new(InterfaceHeader {
                vtable: entry.vtable(),
                handle: handle.as_u64(),
            });
            headers.insert(entry.iid, NonNull::from(Box::leak(header)));
            order.push(entry.iid);
        }

        let identity = match headers.get(&IID_IUNKNOWN) {
            Some(header) => *header,
            None => unreachable!("unknown interface is always appended"),
        };
        Self {
            headers,
            order,
            identity,
        }
    }

    /// Interface pointer for `iid`
    pub(crate) fn get(&self, iid: &Guid) -> Option<*mut c_void> {
        self.headers.get(iid).map(|header| header.as_ptr() as *mut c_void)
    }

    /// Interface pointer of the unknown interface
    pub(crate) fn identity(&self) -> *mut c_void {
        self.identity.as_ptr() as *mut c_void
    }

    /// Interface ids in table order
    pub(crate) fn iids(&self) -> &[Guid] {
        &self.order
    }
}

impl Drop for DispatchTable {
    fn drop(&mut self) {
        for (_, header) in self.headers.drain() {
            drop(unsafe { Box::from_raw(header.as_ptr()) });
        }
    }
}

/// Recover the wrapper behind an interface pointer
///
/// # Safety
///
/// `this` must be null or point to an [`InterfaceHeader`] allocated by a
/// wrapper's dispatch table.
pub(crate) unsafe fn recover(this: *mut c_void) -> InteropResult<Arc<Ncw>> {
    if this.is_null() {
        return Err(tandem_abi::AbiError::NullPointer.into());
    }
    let header = &*(this as *const InterfaceHeader);
    let handle = header.handle();
    if handle.is_null() {
        return Err(InteropError::TornDownTable);
    }
    ncw_handles()
        .resolve(handle)
        .ok_or(InteropError::TornDownTable)
}

const UNKNOWN: IUnknownVtbl = IUnknownVtbl {
    query_interface: ncw_query_interface,
    add_ref: ncw_add_ref,
    release: ncw_release,
};

pub(crate) static UNKNOWN_VTBL: IUnknownVtbl = UNKNOWN;

pub(crate) static DISCOVERY_VTBL: IDiscoveryVtbl = IDiscoveryVtbl {
    base: UNKNOWN,
    get_runtime_class_name: ncw_get_runtime_class_name,
};

/// Unknown-interface slots of the wrapper
///
/// Generated vtables for additional interfaces start with these three slots
/// so that QueryInterface/AddRef/Release work through every interface pointer.
pub const fn unknown_vtbl() -> IUnknownVtbl {
    UNKNOWN
}

#[cold]
fn protocol_violation(this: *mut c_void, error: &InteropError) -> ! {
    tracing::error!(?this, %error, "native caller broke the reference-counting protocol");
    std::process::abort()
}

unsafe fn recover_or_abort(this: *mut c_void) -> Arc<Ncw> {
    match recover(this) {
        Ok(ncw) => ncw,
        Err(error) => protocol_violation(this, &error),
    }
}

unsafe extern "system" fn ncw_query_interface(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if out.is_null() {
        return HResult::E_POINTER;
    }
    *out = ptr::null_mut();
    if this.is_null() || iid.is_null() {
        return HResult::E_POINTER;
    }

    let ncw = recover_or_abort(this);
    let iid = *iid;
    match catch_unwind(AssertUnwindSafe(|| ncw.query_interface(&iid))) {
        Ok(Ok(interface)) => {
            *out = interface;
            HResult::S_OK
        }
        Ok(Err(hr)) => hr,
        Err(_) => {
            tracing::error!(%iid, "panic during QueryInterface");
            HResult::E_UNEXPECTED
        }
    }
}

unsafe extern "system" fn ncw_add_ref(this: *mut c_void) -> u32 {
    let ncw = recover_or_abort(this);
    match ncw.add_ref() {
        Ok(refs) => refs,
        Err(error) => protocol_violation(this, &error),
    }
}

unsafe extern "system" fn ncw_release(this: *mut c_void) -> u32 {
    let ncw = recover_or_abort(this);
    match ncw.release() {
        Ok(refs) => refs,
        Err(error) => protocol_violation(this, &error),
    }
}

unsafe extern "system" fn ncw_get_runtime_class_name(
    this: *mut c_void,
    name: *mut *const u8,
    len: *mut usize,
) -> HResult {
    if name.is_null() || len.is_null() {
        return HResult::E_POINTER;
    }
    *name = ptr::null();
    *len = 0;
    if this.is_null() {
        return HResult::E_POINTER;
    }

    let ncw = recover_or_abort(this);
    // Owned by the wrapper, which the caller's reference keeps alive.
    let class_name = ncw.runtime_class_name();
    *name = class_name.as_ptr();
    *len = class_name.len();
    HResult::S_OK
}
