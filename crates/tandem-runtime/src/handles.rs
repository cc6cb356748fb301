//! Collectible handles
//!
//! A handle is a stable numeric name for a shared object that can be stored
//! in native memory. A *weak* handle locates the object without keeping it
//! alive; a *strong* handle keeps it alive until the handle is freed.
//!
//! The native-callable wrapper uses one weak handle for the whole of its life
//! (every dispatch header points at it) and a strong handle only while its
//! native reference count is above zero.

use crate::defaults::FIRST_HANDLE_ID;
use dashmap::DashMap;
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Numeric handle (0 is the null handle)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HandleId(u64);

impl HandleId {
    /// The null handle
    pub const NULL: HandleId = HandleId(0);

    /// Get the numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Rebuild a handle from a value read out of native memory
    pub fn from_u64(id: u64) -> Self {
        HandleId(id)
    }

    /// True for the null handle
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

enum Slot<T: ?Sized> {
    Weak(Weak<T>),
    Strong(Arc<T>),
}

/// Thread-safe table of weak and strong handles
pub struct HandleTable<T: ?Sized> {
    slots: DashMap<u64, Slot<T>, BuildHasherDefault<FxHasher>>,
    next_id: AtomicU64,
}

impl<T: ?Sized> HandleTable<T> {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            slots: DashMap::default(),
            next_id: AtomicU64::new(FIRST_HANDLE_ID),
        }
    }

    fn insert(&self, slot: Slot<T>) -> HandleId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.insert(id, slot);
        HandleId(id)
    }

    /// Allocate a handle that does not keep `target` alive
    pub fn alloc_weak(&self, target: Weak<T>) -> HandleId {
        self.insert(Slot::Weak(target))
    }

    /// Allocate a handle that keeps `target` alive until freed
    pub fn alloc_strong(&self, target: Arc<T>) -> HandleId {
        self.insert(Slot::Strong(target))
    }

    /// Resolve a handle to its target, if the handle exists and the target is alive
    pub fn resolve(&self, id: HandleId) -> Option<Arc<T>> {
        if id.is_null() {
            return None;
        }
        let slot = self.slots.get(&id.0)?;
        let target = match &*slot {
            Slot::Weak(weak) => weak.upgrade(),
            Slot::Strong(strong) => Some(strong.clone()),
        };
        target
    }

    /// True if the handle is allocated and strong
    pub fn is_strong(&self, id: HandleId) -> bool {
        self.slots
            .get(&id.0)
            .is_some_and(|slot| matches!(&*slot, Slot::Strong(_)))
    }

    /// Free a handle
    ///
    /// Freeing a strong handle may drop the last reference to its target; the
    /// target is dropped after the table's internal lock is released.
    /// Returns false if the handle was not allocated.
    pub fn free(&self, id: HandleId) -> bool {
        let removed = self.slots.remove(&id.0);
        removed.is_some()
    }

    /// Number of allocated handles
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if no handles are allocated
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T: ?Sized> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for HandleTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("len", &self.slots.len())
            .finish()
    }
}
