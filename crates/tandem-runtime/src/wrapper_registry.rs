//! Wrapper registry (managed → native)
//!
//! Maps a managed object's reference identity to its native-callable wrapper,
//! so every native caller sees the same identity pointer for the same object.
//! A row owns its wrapper and tracks the managed object weakly: the wrapper
//! lives exactly as long as the object does, and the row is evicted by its
//! cleanup sentinel once the object is gone.

use crate::finalizer::FinalizationQueue;
use crate::ncw::Ncw;
use crate::object::{ManagedIdentity, ManagedObject, ManagedRef};
use crate::projection::InterfaceTableBuilder;
use crate::sentinel::{CleanupSentinel, RowCache, TrackedRow};
use crate::InteropResult;
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::{Arc, Weak};
use tandem_abi::NativeRef;

struct WrapperEntry {
    object: Weak<dyn ManagedObject>,
    wrapper: Arc<Ncw>,
}

impl WrapperEntry {
    fn live_wrapper(&self) -> Option<Arc<Ncw>> {
        (self.object.strong_count() > 0).then(|| self.wrapper.clone())
    }
}

impl TrackedRow<dyn ManagedObject> for WrapperEntry {
    fn tracks(&self, tracked: &Weak<dyn ManagedObject>) -> bool {
        Weak::ptr_eq(&self.object, tracked)
    }
}

/// Managed object → native-callable wrapper
pub struct WrapperRegistry {
    wrappers: Arc<RowCache<ManagedIdentity, WrapperEntry>>,
}

impl WrapperRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            wrappers: Arc::new(RowCache::default()),
        }
    }

    /// The wrapper registered for `object`, if any
    pub fn lookup(&self, object: &ManagedRef) -> Option<Arc<Ncw>> {
        self.wrappers
            .get(&ManagedIdentity::of(object))
            .and_then(|row| row.live_wrapper())
    }

    /// Return the wrapper for `object`, building it on first use
    ///
    /// The wrapper is built outside any lock; if another thread registers a
    /// wrapper first, the candidate is dropped, which frees its dispatch
    /// headers and weak handle. A row left behind by a dead object at the
    /// same address is replaced.
    pub fn acquire_wrapper(
        &self,
        object: &ManagedRef,
        builder: &dyn InterfaceTableBuilder,
        finalizers: &FinalizationQueue,
    ) -> Arc<Ncw> {
        let key = ManagedIdentity::of(object);
        if let Some(wrapper) = self.lookup(object) {
            tracing::trace!(?key, "wrapper registry hit");
            return wrapper;
        }

        let info = builder.type_information(&**object);
        let candidate = Ncw::new(object, info);
        let tracked = Arc::downgrade(object);
        let fresh = WrapperEntry {
            object: tracked.clone(),
            wrapper: candidate.clone(),
        };

        let (existing, stale) = match self.wrappers.entry(key) {
            Entry::Occupied(mut row) => match row.get().live_wrapper() {
                Some(live) => (Some(live), None),
                None => (None, Some(row.insert(fresh))),
            },
            Entry::Vacant(row) => {
                row.insert(fresh);
                (None, None)
            }
        };
        // Dead rows are dropped here, outside the shard lock.
        drop(stale);

        match existing {
            Some(live) => {
                tracing::debug!(?key, "lost wrapper construction race");
                live
            }
            None => {
                let sentinel = CleanupSentinel::new(key, tracked, Arc::downgrade(&self.wrappers));
                finalizers.register(Box::new(sentinel));
                candidate
            }
        }
    }

    /// Return an owning native reference to `object`'s wrapper identity
    ///
    /// The reference is counted by the wrapper, so the wrapper and the managed
    /// object stay alive until the reference is released.
    pub fn create_native_reference(
        &self,
        object: &ManagedRef,
        builder: &dyn InterfaceTableBuilder,
        finalizers: &FinalizationQueue,
    ) -> InteropResult<NativeRef> {
        let wrapper = self.acquire_wrapper(object, builder, finalizers);
        // AddRef happens before `wrapper` is dropped.
        let reference = unsafe { NativeRef::from_borrowed(wrapper.identity_ptr()) }?;
        Ok(reference)
    }

    /// Number of rows, including stale ones not yet evicted
    pub fn len(&self) -> usize {
        self.wrappers.len()
    }

    /// True if the registry has no rows
    pub fn is_empty(&self) -> bool {
        self.wrappers.is_empty()
    }
}

impl Default for WrapperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WrapperRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapperRegistry")
            .field("rows", &self.wrappers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ManagedObject;
    use crate::projection::InterfaceTableRegistry;

    struct Plain;
    impl ManagedObject for Plain {}

    #[test]
    fn test_same_object_same_wrapper() {
        let registry = WrapperRegistry::new();
        let builder = InterfaceTableRegistry::new();
        let finalizers = FinalizationQueue::new();
        let object: ManagedRef = Arc::new(Plain);

        let first = registry.acquire_wrapper(&object, &builder, &finalizers);
        let second = registry.acquire_wrapper(&object, &builder, &finalizers);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(finalizers.pending(), 1);
    }

    #[test]
    fn test_distinct_objects_distinct_wrappers() {
        let registry = WrapperRegistry::new();
        let builder = InterfaceTableRegistry::new();
        let finalizers = FinalizationQueue::new();
        let a: ManagedRef = Arc::new(Plain);
        let b: ManagedRef = Arc::new(Plain);

        let wa = registry.acquire_wrapper(&a, &builder, &finalizers);
        let wb = registry.acquire_wrapper(&b, &builder, &finalizers);
        assert!(!Arc::ptr_eq(&wa, &wb));
        assert_ne!(wa.identity_ptr(), wb.identity_ptr());
    }

    #[test]
    fn test_wrapper_outlives_its_arcs() {
        let registry = WrapperRegistry::new();
        let builder = InterfaceTableRegistry::new();
        let finalizers = FinalizationQueue::new();
        let object: ManagedRef = Arc::new(Plain);

        let identity = registry.acquire_wrapper(&object, &builder, &finalizers).identity_ptr();
        let again = registry.acquire_wrapper(&object, &builder, &finalizers);
        assert_eq!(again.identity_ptr(), identity);
        assert_eq!(finalizers.pending(), 1);
    }

    #[test]
    fn test_native_reference_keeps_object_alive() {
        let registry = WrapperRegistry::new();
        let builder = InterfaceTableRegistry::new();
        let finalizers = FinalizationQueue::new();
        let object: ManagedRef = Arc::new(Plain);
        let weak_object = Arc::downgrade(&object);

        let native = registry.create_native_reference(&object, &builder, &finalizers).unwrap();
        let wrapper = registry.lookup(&object).unwrap();
        assert_eq!(wrapper.ref_count(), 1);
        assert_eq!(native.as_raw(), wrapper.identity_ptr());

        let weak_wrapper = Arc::downgrade(&wrapper);
        drop(wrapper);
        drop(object);
        assert!(weak_object.upgrade().is_some());
        finalizers.run_pass();
        assert_eq!(registry.len(), 1);

        drop(native);
        assert!(weak_object.upgrade().is_none());
        finalizers.run_pass();
        assert!(registry.is_empty());
        assert!(weak_wrapper.upgrade().is_none());
    }
}
