//! Interop runtime
//!
//! `InteropRuntime` is the public entry point. It owns both caches and the
//! finalization queue, and applies the configured resolver, interface builder
//! and unwrap policy on every acquisition.

use crate::finalizer::{FinalizationQueue, FinalizerStats, PassReport};
use crate::identity_cache::IdentityCache;
use crate::ncw::Ncw;
use crate::object::{ManagedRef, NativeIdentity};
use crate::options::InteropOptions;
use crate::wrapper_registry::WrapperRegistry;
use crate::{InteropError, InteropResult};
use once_cell::sync::Lazy;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;
use tandem_abi::NativeRef;

static GLOBAL_RUNTIME: Lazy<InteropRuntime> = Lazy::new(InteropRuntime::default);

/// Identity and lifetime manager for the object-model bridge
///
/// It owns:
/// - The identity cache (native object → managed proxy)
/// - The wrapper registry (managed object → native-callable wrapper)
/// - The finalization queue driving cache cleanup
pub struct InteropRuntime {
    options: InteropOptions,
    proxies: IdentityCache,
    wrappers: WrapperRegistry,
    finalizers: FinalizationQueue,
}

impl InteropRuntime {
    /// Create a runtime with its own caches
    ///
    /// # Arguments
    /// * `options` - Resolver, interface builder, unwrap policy and
    ///   finalization threshold
    ///
    /// # Example
    /// ```ignore
    /// let runtime = InteropRuntime::new(InteropOptions {
    ///     finalizer_threshold: None,
    ///     ..Default::default()
    /// });
    /// ```
    pub fn new(options: InteropOptions) -> Self {
        tracing::debug!(?options, "creating interop runtime");
        Self {
            options,
            proxies: IdentityCache::new(),
            wrappers: WrapperRegistry::new(),
            finalizers: FinalizationQueue::new(),
        }
    }

    /// Process-wide runtime built from the default options
    ///
    /// Uses the global projection and interface table registries.
    pub fn global() -> &'static InteropRuntime {
        &GLOBAL_RUNTIME
    }

    /// Options this runtime was created with
    pub fn options(&self) -> &InteropOptions {
        &self.options
    }

    /// Return the managed proxy for a native object
    ///
    /// # Arguments
    /// * `reference` - Any interface of the native object
    ///
    /// # Returns
    /// * `Ok(proxy)` - The cached proxy, or a newly built one; boxed values
    ///   are unwrapped per the unwrap policy
    /// * `Err(InteropError::UnresolvedType)` - No projection for the object's
    ///   runtime class
    /// * `Err(InteropError::NotProjectable)` - The object answers neither the
    ///   discovery nor the weak-reference interface
    /// * `Err(InteropError::Abi)` - The native object failed a call
    pub fn acquire_proxy(&self, reference: &NativeRef) -> InteropResult<ManagedRef> {
        let proxy = self.proxies.acquire_proxy(
            reference,
            &*self.options.resolver,
            &self.options.weak_reference_factory,
            &self.finalizers,
        )?;
        self.maybe_finalize();
        Ok(self.options.unwrap_policy.apply(proxy))
    }

    /// [`acquire_proxy`](Self::acquire_proxy) for a raw pointer received
    /// over the ABI
    ///
    /// A null pointer, or an object answering neither the discovery nor the
    /// weak-reference interface, yields `Ok(None)`. The caller's reference is
    /// borrowed; the proxy takes its own.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live interface pointer.
    pub unsafe fn acquire_proxy_for_abi(&self, ptr: *mut c_void) -> InteropResult<Option<ManagedRef>> {
        if ptr.is_null() {
            return Ok(None);
        }
        let reference = NativeRef::from_borrowed(ptr)?;
        match self.acquire_proxy(&reference) {
            Ok(proxy) => Ok(Some(proxy)),
            Err(InteropError::NotProjectable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Register a proxy constructed by an activation path
    ///
    /// Returns false if a row already exists for `identity`.
    pub fn register_proxy(&self, proxy: &ManagedRef, identity: NativeIdentity) -> bool {
        let inserted = self.proxies.register_proxy(proxy, identity, &self.finalizers);
        self.maybe_finalize();
        inserted
    }

    /// Register `proxy` unless a live proxy is already cached for `identity`
    ///
    /// Returns the proxy the cache holds afterwards.
    pub fn try_register_proxy(&self, proxy: ManagedRef, identity: NativeIdentity) -> ManagedRef {
        let proxy = self.proxies.try_register_proxy(proxy, identity, &self.finalizers);
        self.maybe_finalize();
        proxy
    }

    /// Return the native-callable wrapper for a managed object
    pub fn acquire_wrapper(&self, object: &ManagedRef) -> Arc<Ncw> {
        let wrapper =
            self.wrappers
                .acquire_wrapper(object, &*self.options.interface_builder, &self.finalizers);
        self.maybe_finalize();
        wrapper
    }

    /// Return an owning native reference to a managed object
    ///
    /// The reference points at the wrapper's unknown interface and keeps the
    /// object alive until it is released.
    pub fn create_native_reference(&self, object: &ManagedRef) -> InteropResult<NativeRef> {
        let reference = self.wrappers.create_native_reference(
            object,
            &*self.options.interface_builder,
            &self.finalizers,
        )?;
        self.maybe_finalize();
        Ok(reference)
    }

    /// The identity cache
    pub fn proxies(&self) -> &IdentityCache {
        &self.proxies
    }

    /// The wrapper registry
    pub fn wrappers(&self) -> &WrapperRegistry {
        &self.wrappers
    }

    /// Run a finalization pass now
    pub fn run_finalizers(&self) -> PassReport {
        self.finalizers.run_pass()
    }

    /// Cumulative finalization statistics
    pub fn finalizer_stats(&self) -> FinalizerStats {
        self.finalizers.stats()
    }

    fn maybe_finalize(&self) {
        if let Some(threshold) = self.options.finalizer_threshold {
            if self.finalizers.registrations_since_pass() >= threshold {
                self.finalizers.run_pass();
            }
        }
    }
}

impl Default for InteropRuntime {
    fn default() -> Self {
        Self::new(InteropOptions::default())
    }
}

impl fmt::Debug for InteropRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteropRuntime")
            .field("options", &self.options)
            .field("proxies", &self.proxies)
            .field("wrappers", &self.wrappers)
            .field("finalizers", &self.finalizers.stats())
            .finish()
    }
}
