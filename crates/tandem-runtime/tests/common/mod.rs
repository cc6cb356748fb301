//! Shared fixtures for the runtime integration tests

#![allow(dead_code)]

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tandem_abi::vtable::IUnknownVtbl;
use tandem_runtime::{
    unknown_vtbl, CustomQueryResult, Guid, HResult, InteropOptions, InteropRuntime,
    InterfaceTableRegistry, ManagedObject, ManagedRef, NativeRef, Ncw, ProjectionRegistry,
    TypeInformation,
};

pub const WIDGET_CLASS: &str = "Demo.Widget";
pub const GREETER_CLASS: &str = "Demo.Greeter";

pub const IID_GREETER: Guid = Guid::from_u128(0x3f1c_8a2e_6b4d_4e0f_9a17_52c3_d8e4_0b61);
pub const IID_NAMED: Guid = Guid::from_u128(0x7d90_14be_c2a3_4f58_8e6b_a1f0_2c7d_93e4);
pub const IID_UNRELATED: Guid = Guid::from_u128(0xc5e2_7b01_94fd_4a36_b820_6e1a_f3c9_5d72);

/// Managed proxy for a stub native object
pub struct Widget {
    pub reference: NativeRef,
    pub serial: usize,
}

impl ManagedObject for Widget {}

/// Projection registry that builds `Widget` proxies and counts constructions
pub fn widget_projections() -> (Arc<ProjectionRegistry>, Arc<AtomicUsize>) {
    let projections = Arc::new(ProjectionRegistry::new());
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    projections.register(WIDGET_CLASS, move |reference| {
        let serial = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(Widget { reference, serial }) as ManagedRef)
    });
    (projections, built)
}

/// Managed object exposed to native code through two custom interfaces
pub struct Greeter {
    pub name: String,
}

impl ManagedObject for Greeter {}

/// Managed object that declines some interface requests and redirects others
pub struct Picky {
    pub redirect: usize,
}

impl ManagedObject for Picky {
    fn custom_query_interface(&self, iid: &Guid) -> CustomQueryResult {
        if *iid == IID_GREETER || *iid == IID_NAMED {
            CustomQueryResult::Failed
        } else if *iid == IID_UNRELATED {
            CustomQueryResult::Handled(self.redirect as *mut c_void)
        } else {
            CustomQueryResult::NotHandled
        }
    }
}

#[repr(C)]
pub struct GreeterVtbl {
    pub base: IUnknownVtbl,
    pub name_len: unsafe extern "system" fn(this: *mut c_void, out: *mut usize) -> HResult,
}

#[repr(C)]
pub struct NamedVtbl {
    pub base: IUnknownVtbl,
}

pub static GREETER_VTBL: GreeterVtbl = GreeterVtbl {
    base: unknown_vtbl(),
    name_len: greeter_name_len,
};

pub static NAMED_VTBL: NamedVtbl = NamedVtbl {
    base: unknown_vtbl(),
};

unsafe extern "system" fn greeter_name_len(this: *mut c_void, out: *mut usize) -> HResult {
    if out.is_null() {
        return HResult::E_POINTER;
    }
    match Ncw::find_object::<Greeter>(this) {
        Ok(greeter) => {
            *out = greeter.name.len();
            HResult::S_OK
        }
        Err(error) => error.hresult(),
    }
}

/// Interface tables for `Greeter` and `Picky`
pub fn greeter_tables() -> Arc<InterfaceTableRegistry> {
    let tables = Arc::new(InterfaceTableRegistry::new());
    tables.register::<Greeter>(
        TypeInformation::named(GREETER_CLASS)
            .with_interface(IID_GREETER, &GREETER_VTBL)
            .with_interface(IID_NAMED, &NAMED_VTBL),
    );
    tables.register::<Picky>(
        TypeInformation::named("Demo.Picky").with_interface(IID_GREETER, &GREETER_VTBL),
    );
    tables
}

/// Runtime with widget projections, greeter tables and manual finalization
pub fn test_runtime() -> (InteropRuntime, Arc<AtomicUsize>) {
    let (projections, built) = widget_projections();
    let options = InteropOptions::default()
        .with_finalizer_threshold(None)
        .with_resolver(projections)
        .with_interface_builder(greeter_tables());
    (InteropRuntime::new(options), built)
}

pub fn serial_of(proxy: &ManagedRef) -> usize {
    tandem_runtime::downcast_ref::<Widget>(&**proxy)
        .map(|widget| widget.serial)
        .unwrap_or(0)
}
