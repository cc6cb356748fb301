//! Wrapper registry behaviour through the runtime entry points

mod common;

use common::*;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tandem_runtime::{downcast_arc, ManagedRef, Ncw, IID_DISCOVERY, IID_IUNKNOWN};

fn greeter(name: &str) -> ManagedRef {
    Arc::new(Greeter { name: name.to_owned() })
}

#[test]
fn test_concurrent_acquire_yields_one_wrapper() {
    let (runtime, _built) = test_runtime();
    let object = greeter("ada");
    let threads = 8;
    let barrier = Barrier::new(threads);

    let wrappers: Vec<Arc<Ncw>> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    runtime.acquire_wrapper(&object)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let identities: HashSet<usize> = wrappers.iter().map(|w| w.identity_ptr() as usize).collect();
    assert_eq!(identities.len(), 1);
    for wrapper in &wrappers[1..] {
        assert!(Arc::ptr_eq(&wrappers[0], wrapper));
    }
    assert_eq!(runtime.wrappers().len(), 1);
}

#[test]
fn test_wrapper_carries_registered_interfaces() {
    let (runtime, _built) = test_runtime();
    let object = greeter("ada");
    let wrapper = runtime.acquire_wrapper(&object);

    assert_eq!(wrapper.runtime_class_name(), GREETER_CLASS);
    assert_eq!(
        wrapper.interface_ids(),
        &[IID_GREETER, IID_NAMED, IID_IUNKNOWN, IID_DISCOVERY]
    );
    assert!(Arc::ptr_eq(&wrapper.managed_object().unwrap(), &object));
}

#[test]
fn test_unregistered_type_gets_mandatory_interfaces_only() {
    let (runtime, _built) = test_runtime();
    let object: ManagedRef = Arc::new(String::from("plain"));
    let wrapper = runtime.acquire_wrapper(&object);

    assert_eq!(wrapper.runtime_class_name(), "");
    assert_eq!(wrapper.interface_ids(), &[IID_IUNKNOWN, IID_DISCOVERY]);
}

#[test]
fn test_native_reference_owns_object() {
    let (runtime, _built) = test_runtime();
    let object = greeter("ada");
    let watch = Arc::downgrade(&object);

    let native = runtime.create_native_reference(&object).unwrap();
    drop(object);
    assert!(watch.upgrade().is_some());

    let wrapper = unsafe { Ncw::from_abi(native.as_raw()) }.unwrap();
    assert_eq!(wrapper.ref_count(), 1);
    assert!(wrapper.has_strong_hold());
    drop(wrapper);

    drop(native);
    assert!(watch.upgrade().is_none());

    assert_eq!(runtime.run_finalizers().finalized, 1);
    assert!(runtime.wrappers().is_empty());
}

#[test]
fn test_same_identity_for_every_native_reference() {
    let (runtime, _built) = test_runtime();
    let object = greeter("ada");

    let first = runtime.create_native_reference(&object).unwrap();
    let second = runtime.create_native_reference(&object).unwrap();
    assert_eq!(first, second);
    assert_eq!(runtime.acquire_wrapper(&object).ref_count(), 2);
}

#[test]
fn test_native_round_trip_recovers_object() {
    let (runtime, _built) = test_runtime();
    let object = greeter("ada");
    let native = runtime.create_native_reference(&object).unwrap();

    let greeter_iface = native.query_interface(&IID_GREETER).unwrap();
    let recovered = unsafe { Ncw::find_object::<Greeter>(greeter_iface.as_raw()) }.unwrap();
    assert_eq!(recovered.name, "ada");
    assert!(Arc::ptr_eq(&(recovered as ManagedRef), &object));
    assert!(downcast_arc::<Greeter>(object).is_ok());
}

#[test]
fn test_identity_survives_dropping_every_wrapper_arc() {
    let (runtime, _built) = test_runtime();
    let object = greeter("ada");

    let identity = runtime.acquire_wrapper(&object).identity_ptr();
    assert_eq!(runtime.run_finalizers().finalized, 0);

    let native = runtime.create_native_reference(&object).unwrap();
    assert_eq!(native.as_raw(), identity);
    drop(native);

    assert_eq!(runtime.acquire_wrapper(&object).identity_ptr(), identity);
    assert_eq!(runtime.wrappers().len(), 1);
    assert_eq!(runtime.finalizer_stats().pending, 1);
}
