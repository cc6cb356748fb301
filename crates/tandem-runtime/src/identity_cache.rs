//! Identity cache (native → managed)
//!
//! Maps a native object's identity to a weak reference on its managed proxy,
//! so that at most one live proxy exists per native object. Rows hold weak
//! references only; a proxy is kept alive by its users, and its row is
//! evicted by a cleanup sentinel once the proxy is gone.

use crate::finalizer::FinalizationQueue;
use crate::object::{ManagedObject, ManagedRef, NativeIdentity};
use crate::projection::{ProxyFactory, TypeResolver};
use crate::sentinel::{CleanupSentinel, WeakCache};
use crate::{InteropError, InteropResult};
use dashmap::mapref::entry::Entry;
use std::fmt;
use std::sync::{Arc, Weak};
use tandem_abi::{AbiError, HResult, NativeRef, IID_WEAK_REFERENCE};

/// Native identity → managed proxy
pub struct IdentityCache {
    proxies: Arc<WeakCache<NativeIdentity, dyn ManagedObject>>,
}

/// How a candidate fared against the cache
enum Insertion {
    /// The candidate is now cached
    Inserted(ManagedRef),
    /// A live proxy was already cached; the candidate lost
    Existing(ManagedRef),
}

impl IdentityCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            proxies: Arc::new(WeakCache::default()),
        }
    }

    /// The live proxy cached for `identity`, if any
    pub fn lookup(&self, identity: NativeIdentity) -> Option<ManagedRef> {
        self.proxies.get(&identity).and_then(|row| row.upgrade())
    }

    /// Return the proxy for a native object, building it on first use
    ///
    /// The reference is normalized to its identity first, so any interface
    /// pointer of the same object finds the same proxy. On a miss the object's
    /// runtime class name is resolved to a factory; an object without the
    /// discovery interface is handed to `fallback` through its weak-reference
    /// interface instead. The new proxy is raced into the cache; if another
    /// thread won, its proxy is returned and the candidate (with its native
    /// reference) is dropped.
    ///
    /// Fails with [`InteropError::NotProjectable`] if the object answers
    /// neither interface.
    pub fn acquire_proxy(
        &self,
        reference: &NativeRef,
        resolver: &dyn TypeResolver,
        fallback: &ProxyFactory,
        finalizers: &FinalizationQueue,
    ) -> InteropResult<ManagedRef> {
        let identity_ref = reference.identity()?;
        let identity = NativeIdentity::from_raw(identity_ref.as_raw());

        if let Some(proxy) = self.lookup(identity) {
            tracing::trace!(?identity, "identity cache hit");
            return Ok(proxy);
        }

        let candidate = build_proxy(identity_ref, resolver, fallback)?;
        tracing::trace!(?identity, "constructed proxy");

        match self.insert_if_absent(identity, candidate, finalizers) {
            Insertion::Inserted(proxy) => Ok(proxy),
            Insertion::Existing(winner) => {
                tracing::debug!(?identity, "lost proxy construction race");
                Ok(winner)
            }
        }
    }

    /// Register a proxy created outside the cache (activation path)
    ///
    /// Inserts only if no row exists for `identity`; the caller guarantees no
    /// other proxy can exist yet. Returns true if the proxy was registered.
    pub fn register_proxy(
        &self,
        proxy: &ManagedRef,
        identity: NativeIdentity,
        finalizers: &FinalizationQueue,
    ) -> bool {
        let weak = Arc::downgrade(proxy);
        let inserted = match self.proxies.entry(identity) {
            Entry::Occupied(_) => false,
            Entry::Vacant(row) => {
                row.insert(weak.clone());
                true
            }
        };
        if inserted {
            self.track(identity, weak, finalizers);
        }
        inserted
    }

    /// Register `proxy` unless a live proxy is already registered
    ///
    /// Returns whichever proxy the cache holds afterwards.
    pub fn try_register_proxy(
        &self,
        proxy: ManagedRef,
        identity: NativeIdentity,
        finalizers: &FinalizationQueue,
    ) -> ManagedRef {
        match self.insert_if_absent(identity, proxy, finalizers) {
            Insertion::Inserted(proxy) | Insertion::Existing(proxy) => proxy,
        }
    }

    fn insert_if_absent(
        &self,
        identity: NativeIdentity,
        candidate: ManagedRef,
        finalizers: &FinalizationQueue,
    ) -> Insertion {
        let weak = Arc::downgrade(&candidate);
        let existing = match self.proxies.entry(identity) {
            Entry::Occupied(mut row) => match row.get().upgrade() {
                Some(live) => Some(live),
                None => {
                    row.insert(weak.clone());
                    None
                }
            },
            Entry::Vacant(row) => {
                row.insert(weak.clone());
                None
            }
        };

        match existing {
            // `candidate` drops here, outside the shard lock.
            Some(live) => Insertion::Existing(live),
            None => {
                self.track(identity, weak, finalizers);
                Insertion::Inserted(candidate)
            }
        }
    }

    fn track(&self, identity: NativeIdentity, weak: Weak<dyn ManagedObject>, finalizers: &FinalizationQueue) {
        let sentinel = CleanupSentinel::new(identity, weak, Arc::downgrade(&self.proxies));
        finalizers.register(Box::new(sentinel));
    }

    /// Number of rows, including stale ones not yet evicted
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// True if the cache has no rows
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

fn build_proxy(
    identity_ref: NativeRef,
    resolver: &dyn TypeResolver,
    fallback: &ProxyFactory,
) -> InteropResult<ManagedRef> {
    match identity_ref.runtime_class_name() {
        Ok(class_name) => {
            let factory = resolver
                .resolve(&class_name)
                .ok_or_else(|| InteropError::UnresolvedType(class_name.clone()))?;
            tracing::trace!(class = %class_name, "resolved projection");
            factory(identity_ref)
        }
        Err(AbiError::Failed(hr)) if hr == HResult::E_NOINTERFACE => {
            match identity_ref.query_interface(&IID_WEAK_REFERENCE) {
                Ok(weak) => fallback(weak),
                Err(AbiError::Failed(hr)) if hr == HResult::E_NOINTERFACE => {
                    Err(InteropError::NotProjectable)
                }
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("rows", &self.proxies.len())
            .finish()
    }
}
