//! In-process stand-in for a native component
//!
//! `StubObject` is a hand-written native object with the fixed ABI shape:
//! an unknown interface at offset 0, an optional discovery interface at
//! offset 8 and an optional weak-reference interface at offset 16. Its reference count and destruction are observable through
//! [`StubCounters`] so tests can check that every reference taken is released.

use crate::guid::Guid;
use crate::hresult::HResult;
use crate::reference::NativeRef;
use crate::vtable::{
    IDiscoveryVtbl, IUnknownVtbl, IWeakReferenceVtbl, IID_DISCOVERY, IID_IUNKNOWN, IID_WEAK_REFERENCE,
};
use std::ffi::c_void;
use std::mem::offset_of;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

/// Observable state of a stub object, shared with the test
#[derive(Debug, Default)]
pub struct StubCounters {
    refs: AtomicU32,
    destroyed: AtomicBool,
}

impl StubCounters {
    /// Current native reference count
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// True once the count reached zero and the object freed itself
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}

#[repr(C)]
struct StubObject {
    unknown: *const IUnknownVtbl,
    discovery: *const IDiscoveryVtbl,
    weak_reference: *const IWeakReferenceVtbl,
    class_name: Option<String>,
    answers_weak_reference: bool,
    counters: Arc<StubCounters>,
}

static STUB_UNKNOWN_VTBL: IUnknownVtbl = IUnknownVtbl {
    query_interface: stub_query_interface,
    add_ref: stub_add_ref,
    release: stub_release,
};

static STUB_DISCOVERY_VTBL: IDiscoveryVtbl = IDiscoveryVtbl {
    base: IUnknownVtbl {
        query_interface: discovery_query_interface,
        add_ref: discovery_add_ref,
        release: discovery_release,
    },
    get_runtime_class_name: discovery_get_runtime_class_name,
};

static STUB_WEAK_REFERENCE_VTBL: IWeakReferenceVtbl = IWeakReferenceVtbl {
    base: IUnknownVtbl {
        query_interface: weak_query_interface,
        add_ref: weak_add_ref,
        release: weak_release,
    },
    resolve: weak_resolve,
};

/// Create a stub native object
///
/// With `Some(name)` the object answers for the discovery interface and
/// reports `name`; with `None` it only implements the unknown interface.
/// The returned reference owns the object's only reference.
pub fn create_stub(class_name: Option<&str>) -> (NativeRef, Arc<StubCounters>) {
    build_stub(class_name, false)
}

/// Create a stub that answers the weak-reference interface but not discovery
///
/// Resolving the weak reference yields the stub itself.
pub fn create_weak_reference_stub() -> (NativeRef, Arc<StubCounters>) {
    build_stub(None, true)
}

fn build_stub(class_name: Option<&str>, answers_weak_reference: bool) -> (NativeRef, Arc<StubCounters>) {
    let counters = Arc::new(StubCounters::default());
    counters.refs.store(1, Ordering::Release);
    let object = Box::new(StubObject {
        unknown: &STUB_UNKNOWN_VTBL,
        discovery: &STUB_DISCOVERY_VTBL,
        weak_reference: &STUB_WEAK_REFERENCE_VTBL,
        class_name: class_name.map(str::to_owned),
        answers_weak_reference,
        counters: counters.clone(),
    });
    let ptr = Box::into_raw(object) as *mut c_void;
    let reference = unsafe { NativeRef::from_raw(ptr) }.expect("Box pointer is never null");
    (reference, counters)
}

unsafe fn from_unknown<'a>(this: *mut c_void) -> &'a StubObject {
    &*(this as *const StubObject)
}

unsafe fn discovery_to_unknown(this: *mut c_void) -> *mut c_void {
    (this as *mut u8).sub(offset_of!(StubObject, discovery)) as *mut c_void
}

unsafe fn weak_to_unknown(this: *mut c_void) -> *mut c_void {
    (this as *mut u8).sub(offset_of!(StubObject, weak_reference)) as *mut c_void
}

unsafe extern "system" fn stub_query_interface(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if this.is_null() || iid.is_null() || out.is_null() {
        return HResult::E_POINTER;
    }
    let object = from_unknown(this);
    let iid = *iid;
    let found: *mut c_void = if iid == IID_IUNKNOWN {
        this
    } else if iid == IID_DISCOVERY && object.class_name.is_some() {
        (this as *mut u8).add(offset_of!(StubObject, discovery)) as *mut c_void
    } else if iid == IID_WEAK_REFERENCE && object.answers_weak_reference {
        (this as *mut u8).add(offset_of!(StubObject, weak_reference)) as *mut c_void
    } else {
        *out = std::ptr::null_mut();
        return HResult::E_NOINTERFACE;
    };
    stub_add_ref(this);
    *out = found;
    HResult::S_OK
}

unsafe extern "system" fn stub_add_ref(this: *mut c_void) -> u32 {
    from_unknown(this).counters.refs.fetch_add(1, Ordering::AcqRel) + 1
}

unsafe extern "system" fn stub_release(this: *mut c_void) -> u32 {
    let counters = from_unknown(this).counters.clone();
    let remaining = counters.refs.fetch_sub(1, Ordering::AcqRel) - 1;
    if remaining == 0 {
        drop(Box::from_raw(this as *mut StubObject));
        counters.destroyed.store(true, Ordering::Release);
    }
    remaining
}

unsafe extern "system" fn discovery_query_interface(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    stub_query_interface(discovery_to_unknown(this), iid, out)
}

unsafe extern "system" fn discovery_add_ref(this: *mut c_void) -> u32 {
    stub_add_ref(discovery_to_unknown(this))
}

unsafe extern "system" fn discovery_release(this: *mut c_void) -> u32 {
    stub_release(discovery_to_unknown(this))
}

unsafe extern "system" fn discovery_get_runtime_class_name(
    this: *mut c_void,
    name: *mut *const u8,
    len: *mut usize,
) -> HResult {
    if name.is_null() || len.is_null() {
        return HResult::E_POINTER;
    }
    let object = from_unknown(discovery_to_unknown(this));
    let class_name = object.class_name.as_deref().unwrap_or_default();
    *name = class_name.as_ptr();
    *len = class_name.len();
    HResult::S_OK
}

unsafe extern "system" fn weak_query_interface(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    stub_query_interface(weak_to_unknown(this), iid, out)
}

unsafe extern "system" fn weak_add_ref(this: *mut c_void) -> u32 {
    stub_add_ref(weak_to_unknown(this))
}

unsafe extern "system" fn weak_release(this: *mut c_void) -> u32 {
    stub_release(weak_to_unknown(this))
}

unsafe extern "system" fn weak_resolve(
    this: *mut c_void,
    iid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    stub_query_interface(weak_to_unknown(this), iid, out)
}
