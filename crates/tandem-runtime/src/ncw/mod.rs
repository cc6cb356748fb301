//! Native-callable wrapper (NCW)
//!
//! An `Ncw` exposes one managed object to native callers. It holds the
//! managed object weakly, a dispatch header per interface, and the
//! reference-counting state:
//!
//! - A **weak handle**, allocated for the whole life of the wrapper. Every
//!   dispatch header stores it, so native calls can always find the wrapper.
//! - A **strong hold**, present only while the native reference count is
//!   above zero. It keeps the wrapper and the managed object alive for as long
//!   as native code holds a reference.
//!
//! The wrapper registry keeps each wrapper alive for as long as its managed
//! object is, so one object keeps one native identity.
//!
//! # Reference-count protocol
//!
//! `add_ref` on the 0→1 transition allocates a strong hold and publishes it;
//! if an older hold is found in the slot it is freed, so one hold survives.
//! `release` on 1→0 clears the slot with a compare-and-swap against the hold
//! observed before decrementing. If the CAS fails a concurrent `add_ref` has
//! installed a newer hold, which now belongs to that caller and stays.
//!
//! One interleaving is accepted rather than closed: thread Y takes the count
//! 0→1 but has not published its hold yet, thread Z takes it 1→2 and reads the
//! empty slot in `release`, Y publishes and releases 2→1, and Z finally
//! decrements 1→0 without a hold to clear. The hold then outlives the count
//! and pins the object until the next 0→1 transition reclaims it. Closing the
//! window would need a lock on the AddRef/Release path.

mod dispatch;

pub use dispatch::{unknown_vtbl, InterfaceHeader};

use crate::handles::{HandleId, HandleTable};
use crate::object::{downcast_arc, CustomQueryResult, ManagedObject, ManagedRef};
use crate::projection::TypeInformation;
use crate::{InteropError, InteropResult};
use dispatch::DispatchTable;
use once_cell::sync::Lazy;
use std::any::type_name;
use std::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tandem_abi::{Guid, HResult};

static NCW_HANDLES: Lazy<HandleTable<Ncw>> = Lazy::new(HandleTable::new);

static NCW_HOLDS: Lazy<HandleTable<StrongHold>> = Lazy::new(HandleTable::new);

/// What a native reference keeps alive
struct StrongHold {
    _wrapper: Arc<Ncw>,
    _object: ManagedRef,
}

/// Handle table shared by every wrapper in the process
///
/// Native callers only hand back raw interface pointers, so the table the
/// headers point into has to be reachable without any runtime instance.
pub(crate) fn ncw_handles() -> &'static HandleTable<Ncw> {
    &NCW_HANDLES
}

/// Native-callable wrapper around a managed object
pub struct Ncw {
    object: Weak<dyn ManagedObject>,
    info: TypeInformation,
    table: DispatchTable,
    weak_handle: HandleId,
    refs: AtomicU32,
    strong_handle: AtomicU64,
}

impl Ncw {
    /// Build a wrapper with no native references
    ///
    /// `info` comes from the interface table builder; the unknown and
    /// discovery interfaces are appended by the dispatch table.
    pub(crate) fn new(object: &ManagedRef, info: TypeInformation) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let weak_handle = ncw_handles().alloc_weak(weak.clone());
            let table = DispatchTable::build(&info.interfaces, weak_handle);
            tracing::trace!(
                class = %info.runtime_class_name,
                interfaces = table.iids().len(),
                "built native-callable wrapper"
            );
            Self {
                object: Arc::downgrade(object),
                info,
                table,
                weak_handle,
                refs: AtomicU32::new(0),
                strong_handle: AtomicU64::new(HandleId::NULL.as_u64()),
            }
        })
    }

    /// Take a native reference
    ///
    /// Returns the new count, or [`InteropError::ObjectCollected`] if the
    /// count was zero and the managed object is already gone.
    pub fn add_ref(self: &Arc<Self>) -> InteropResult<u32> {
        let refs = self.refs.fetch_add(1, Ordering::AcqRel) + 1;
        if refs == 1 {
            let Some(object) = self.object.upgrade() else {
                self.refs.fetch_sub(1, Ordering::AcqRel);
                tracing::error!(class = %self.info.runtime_class_name, "add_ref on a collected object");
                return Err(InteropError::ObjectCollected);
            };
            let hold = NCW_HOLDS.alloc_strong(Arc::new(StrongHold {
                _wrapper: self.clone(),
                _object: object,
            }));
            let previous = self.strong_handle.swap(hold.as_u64(), Ordering::AcqRel);
            if previous != HandleId::NULL.as_u64() {
                // Another 0→1 transition raced us; only one hold survives.
                NCW_HOLDS.free(HandleId::from_u64(previous));
            }
        }
        Ok(refs)
    }

    /// Drop a native reference
    ///
    /// Returns the new count, or [`InteropError::OverRelease`] if the count
    /// was already zero.
    pub fn release(self: &Arc<Self>) -> InteropResult<u32> {
        let observed_hold = self.strong_handle.load(Ordering::Acquire);
        let previous = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
            .map_err(|_| {
                tracing::error!(class = %self.info.runtime_class_name, "release on a zero reference count");
                InteropError::OverRelease
            })?;

        let refs = previous - 1;
        if refs == 0 && observed_hold != HandleId::NULL.as_u64() {
            let cleared = self
                .strong_handle
                .compare_exchange(
                    observed_hold,
                    HandleId::NULL.as_u64(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
            if cleared {
                NCW_HOLDS.free(HandleId::from_u64(observed_hold));
            }
        }
        Ok(refs)
    }

    /// Look up an interface
    ///
    /// The managed object gets first refusal through
    /// [`ManagedObject::custom_query_interface`]; only a `Handled` answer ends
    /// the lookup, anything else falls through to the interface table. A hit
    /// in the table takes a reference on the caller's behalf.
    pub fn query_interface(self: &Arc<Self>, iid: &Guid) -> Result<*mut c_void, HResult> {
        let Some(object) = self.object.upgrade() else {
            return Err(InteropError::ObjectCollected.hresult());
        };
        if let CustomQueryResult::Handled(interface) = object.custom_query_interface(iid) {
            return Ok(interface);
        }
        drop(object);

        match self.table.get(iid) {
            Some(interface) => {
                self.add_ref().map_err(|e| e.hresult())?;
                Ok(interface)
            }
            None => {
                tracing::trace!(%iid, class = %self.info.runtime_class_name, "interface not supported");
                Err(HResult::E_NOINTERFACE)
            }
        }
    }

    /// Current native reference count
    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// True while native references keep the managed object alive
    pub fn has_strong_hold(&self) -> bool {
        self.strong_handle.load(Ordering::Acquire) != HandleId::NULL.as_u64()
    }

    /// Pointer to the unknown interface; the wrapper's native identity
    pub fn identity_ptr(&self) -> *mut c_void {
        self.table.identity()
    }

    /// Pointer to `iid` without taking a reference
    pub fn interface_ptr(&self, iid: &Guid) -> Option<*mut c_void> {
        self.table.get(iid)
    }

    /// Interfaces this wrapper answers for, in table order
    pub fn interface_ids(&self) -> &[Guid] {
        self.table.iids()
    }

    /// The wrapped managed object, unless it has been dropped
    pub fn managed_object(&self) -> Option<ManagedRef> {
        self.object.upgrade()
    }

    /// True while the wrapped managed object is alive
    pub fn is_object_alive(&self) -> bool {
        self.object.strong_count() > 0
    }

    /// Name reported through the discovery interface
    pub fn runtime_class_name(&self) -> &str {
        &self.info.runtime_class_name
    }

    /// Type information the wrapper was built from
    pub fn type_information(&self) -> &TypeInformation {
        &self.info
    }

    /// Recover the wrapper behind any of its interface pointers
    ///
    /// # Safety
    ///
    /// `this` must be null or an interface pointer handed out by a wrapper
    /// that the caller holds a reference on.
    pub unsafe fn from_abi(this: *mut c_void) -> InteropResult<Arc<Ncw>> {
        dispatch::recover(this)
    }

    /// Recover the typed managed object behind an interface pointer
    ///
    /// Used by generated method thunks.
    ///
    /// # Safety
    ///
    /// Same contract as [`Ncw::from_abi`].
    pub unsafe fn find_object<T: ManagedObject>(this: *mut c_void) -> InteropResult<Arc<T>> {
        let object = Self::from_abi(this)?
            .managed_object()
            .ok_or(InteropError::ObjectCollected)?;
        downcast_arc::<T>(object).map_err(|_| InteropError::TypeMismatch {
            expected: type_name::<T>(),
        })
    }
}

impl Drop for Ncw {
    fn drop(&mut self) {
        ncw_handles().free(self.weak_handle);
        tracing::trace!(class = %self.info.runtime_class_name, "dropped native-callable wrapper");
    }
}

impl fmt::Debug for Ncw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ncw")
            .field("class", &self.info.runtime_class_name)
            .field("identity", &self.identity_ptr())
            .field("refs", &self.ref_count())
            .field("strong", &self.has_strong_hold())
            .finish()
    }
}
