//! Identity cache behaviour through the runtime entry points

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;
use tandem_abi::testing::{create_stub, create_weak_reference_stub};
use tandem_runtime::{
    downcast_arc, HResult, InteropError, ManagedRef, NativeIdentity, WeakReferenceProxy,
    IID_DISCOVERY, IID_IUNKNOWN,
};

#[test]
fn test_concurrent_acquire_yields_one_proxy() {
    let (runtime, built) = test_runtime();
    let (reference, counters) = create_stub(Some(WIDGET_CLASS));
    let threads = 8;
    let barrier = Barrier::new(threads);

    let proxies: Vec<ManagedRef> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    runtime.acquire_proxy(&reference).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for proxy in &proxies[1..] {
        assert!(Arc::ptr_eq(&proxies[0], proxy));
    }
    assert!(built.load(Ordering::SeqCst) >= 1);
    // Our reference plus the one held by the surviving proxy; losers released theirs.
    assert_eq!(counters.ref_count(), 2);
    assert_eq!(runtime.proxies().len(), 1);
    assert_eq!(runtime.finalizer_stats().pending, 1);
}

#[test]
fn test_any_interface_finds_same_proxy() {
    let (runtime, built) = test_runtime();
    let (reference, _counters) = create_stub(Some(WIDGET_CLASS));
    let discovery = reference.query_interface(&IID_DISCOVERY).unwrap();
    assert_ne!(discovery.as_raw(), reference.as_raw());

    let via_unknown = runtime.acquire_proxy(&reference).unwrap();
    let via_discovery = runtime.acquire_proxy(&discovery).unwrap();
    assert!(Arc::ptr_eq(&via_unknown, &via_discovery));
    assert_eq!(built.load(Ordering::SeqCst), 1);
}

#[test]
fn test_live_proxy_rearms_sentinel() {
    let (runtime, _built) = test_runtime();
    let (reference, _counters) = create_stub(Some(WIDGET_CLASS));
    let proxy = runtime.acquire_proxy(&reference).unwrap();

    let report = runtime.run_finalizers();
    assert_eq!(report.rearmed, 1);
    assert_eq!(report.finalized, 0);

    let again = runtime.acquire_proxy(&reference).unwrap();
    assert!(Arc::ptr_eq(&proxy, &again));
}

#[test]
fn test_dropped_proxy_is_evicted() {
    let (runtime, _built) = test_runtime();
    let (reference, counters) = create_stub(Some(WIDGET_CLASS));

    let proxy = runtime.acquire_proxy(&reference).unwrap();
    assert_eq!(counters.ref_count(), 2);
    drop(proxy);
    assert_eq!(counters.ref_count(), 1);
    assert_eq!(runtime.proxies().len(), 1);

    let report = runtime.run_finalizers();
    assert_eq!(report.finalized, 1);
    assert!(runtime.proxies().is_empty());
    assert_eq!(runtime.finalizer_stats().pending, 0);
}

#[test]
fn test_fresh_proxy_after_collection() {
    let (runtime, built) = test_runtime();
    let (reference, _counters) = create_stub(Some(WIDGET_CLASS));

    let first = runtime.acquire_proxy(&reference).unwrap();
    assert_eq!(serial_of(&first), 1);
    drop(first);
    runtime.run_finalizers();

    let second = runtime.acquire_proxy(&reference).unwrap();
    assert_eq!(serial_of(&second), 2);
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[test]
fn test_stale_row_replaced_before_eviction() {
    let (runtime, _built) = test_runtime();
    let (reference, _counters) = create_stub(Some(WIDGET_CLASS));

    drop(runtime.acquire_proxy(&reference).unwrap());
    let second = runtime.acquire_proxy(&reference).unwrap();
    assert_eq!(serial_of(&second), 2);

    // The first sentinel must not evict the row now owned by `second`.
    let report = runtime.run_finalizers();
    assert_eq!(report.finalized, 1);
    assert_eq!(report.rearmed, 1);
    let identity = NativeIdentity::of(&reference).unwrap();
    let cached = runtime.proxies().lookup(identity).unwrap();
    assert!(Arc::ptr_eq(&cached, &second));
}

#[test]
fn test_unresolved_type_is_an_error() {
    let (runtime, _built) = test_runtime();
    let (reference, counters) = create_stub(Some("Demo.Unregistered"));

    let err = runtime.acquire_proxy(&reference).unwrap_err();
    assert!(matches!(err, InteropError::UnresolvedType(ref name) if name == "Demo.Unregistered"));
    assert_eq!(err.hresult(), HResult::E_FAIL);
    assert!(runtime.proxies().is_empty());
    assert_eq!(counters.ref_count(), 1);
}

#[test]
fn test_weak_reference_only_object_gets_fallback_proxy() {
    let (runtime, built) = test_runtime();
    let (reference, counters) = create_weak_reference_stub();

    let proxy = runtime.acquire_proxy(&reference).unwrap();
    let weak = downcast_arc::<WeakReferenceProxy>(proxy.clone()).unwrap();
    let target = weak.resolve(&IID_IUNKNOWN).unwrap().unwrap();
    assert_eq!(target, reference);
    assert_eq!(built.load(Ordering::SeqCst), 0);

    let again = runtime.acquire_proxy(&reference).unwrap();
    assert!(Arc::ptr_eq(&proxy, &again));

    drop((target, weak, proxy, again));
    assert_eq!(counters.ref_count(), 1);
}

#[test]
fn test_object_answering_neither_interface() {
    let (runtime, _built) = test_runtime();
    let (reference, counters) = create_stub(None);

    let err = runtime.acquire_proxy(&reference).unwrap_err();
    assert!(matches!(err, InteropError::NotProjectable));
    assert_eq!(err.hresult(), HResult::E_NOINTERFACE);

    let proxy = unsafe { runtime.acquire_proxy_for_abi(reference.as_raw()) }.unwrap();
    assert!(proxy.is_none());
    assert!(runtime.proxies().is_empty());
    assert_eq!(counters.ref_count(), 1);
}

#[test]
fn test_abi_pointer_is_borrowed() {
    let (runtime, _built) = test_runtime();
    let (reference, counters) = create_stub(Some(WIDGET_CLASS));

    assert!(unsafe { runtime.acquire_proxy_for_abi(std::ptr::null_mut()) }
        .unwrap()
        .is_none());

    let proxy = unsafe { runtime.acquire_proxy_for_abi(reference.as_raw()) }
        .unwrap()
        .unwrap();
    assert_eq!(counters.ref_count(), 2);
    drop(proxy);
    assert_eq!(counters.ref_count(), 1);
}

#[test]
fn test_register_proxy_activation_path() {
    let (runtime, built) = test_runtime();
    let (reference, _counters) = create_stub(Some(WIDGET_CLASS));
    let identity = NativeIdentity::of(&reference).unwrap();

    let activated: ManagedRef = Arc::new(Widget {
        reference: reference.clone(),
        serial: 100,
    });
    assert!(runtime.register_proxy(&activated, identity));
    assert!(!runtime.register_proxy(&activated, identity));

    let acquired = runtime.acquire_proxy(&reference).unwrap();
    assert!(Arc::ptr_eq(&acquired, &activated));
    assert_eq!(built.load(Ordering::SeqCst), 0);
}

#[test]
fn test_try_register_proxy_keeps_live_winner() {
    let (runtime, _built) = test_runtime();
    let (reference, _counters) = create_stub(Some(WIDGET_CLASS));
    let identity = NativeIdentity::of(&reference).unwrap();

    let acquired = runtime.acquire_proxy(&reference).unwrap();
    let rival: ManagedRef = Arc::new(Widget {
        reference: reference.clone(),
        serial: 100,
    });
    let kept = runtime.try_register_proxy(rival, identity);
    assert!(Arc::ptr_eq(&kept, &acquired));

    drop((kept, acquired));
    let late: ManagedRef = Arc::new(Widget {
        reference: reference.clone(),
        serial: 200,
    });
    let kept = runtime.try_register_proxy(late.clone(), identity);
    assert!(Arc::ptr_eq(&kept, &late));
}
