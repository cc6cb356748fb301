//! Managed objects and identity keys
//!
//! Anything the runtime hands to or receives from managed code is a
//! [`ManagedObject`] behind an `Arc`. Identity on the managed side is
//! reference identity (the allocation address), never value equality.

use std::any::Any;
use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;
use tandem_abi::{AbiResult, Guid, NativeRef};

/// Result of a managed object's own interface lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomQueryResult {
    /// The object answered; the pointer is returned as-is (the object is
    /// responsible for any reference it carries)
    Handled(*mut c_void),
    /// Fall back to the wrapper's interface table
    NotHandled,
    /// The object declined; the wrapper still consults its table
    Failed,
}

/// A managed object that can cross into native code or stand in for a native one
pub trait ManagedObject: Any + Send + Sync {
    /// Give the object first refusal on `QueryInterface` calls made through its wrapper
    ///
    /// Called on native threads; must not panic.
    fn custom_query_interface(&self, _iid: &Guid) -> CustomQueryResult {
        CustomQueryResult::NotHandled
    }
}

/// Shared reference to a managed object
pub type ManagedRef = Arc<dyn ManagedObject>;

impl ManagedObject for String {}

impl fmt::Debug for dyn ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedObject").finish_non_exhaustive()
    }
}

/// Borrow a managed object as its concrete type
pub fn downcast_ref<T: ManagedObject>(object: &dyn ManagedObject) -> Option<&T> {
    let any: &dyn Any = object;
    any.downcast_ref::<T>()
}

/// Convert a managed reference into its concrete type, or give it back
pub fn downcast_arc<T: ManagedObject>(object: ManagedRef) -> Result<Arc<T>, ManagedRef> {
    if downcast_ref::<T>(&*object).is_none() {
        return Err(object);
    }
    let any: Arc<dyn Any + Send + Sync> = object;
    // The type was checked above.
    Ok(any
        .downcast::<T>()
        .unwrap_or_else(|_| unreachable!("type checked before downcast")))
}

/// Canonical token for one native object (address of its unknown interface)
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativeIdentity(usize);

impl NativeIdentity {
    /// Normalize any interface pointer of an object to its identity
    pub fn of(reference: &NativeRef) -> AbiResult<Self> {
        let identity = reference.identity()?;
        Ok(Self::from_raw(identity.as_raw()))
    }

    /// Use a pointer that is already known to be the identity pointer
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    /// The identity pointer
    pub fn as_ptr(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    /// True for the null token
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NativeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeIdentity({:#x})", self.0)
    }
}

/// Reference identity of a managed allocation
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ManagedIdentity(usize);

impl ManagedIdentity {
    /// Identity of the allocation behind `object`
    pub fn of(object: &ManagedRef) -> Self {
        Self(Arc::as_ptr(object) as *const () as usize)
    }
}

impl fmt::Debug for ManagedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagedIdentity({:#x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counter(u32);
    impl ManagedObject for Counter {}

    #[test]
    fn test_downcast_ref() {
        let object: ManagedRef = Arc::new(Counter(7));
        assert_eq!(downcast_ref::<Counter>(&*object).map(|c| c.0), Some(7));
        assert!(downcast_ref::<String>(&*object).is_none());
    }

    #[test]
    fn test_downcast_arc_returns_original_on_mismatch() {
        let object: ManagedRef = Arc::new(String::from("text"));
        let object = downcast_arc::<Counter>(object).unwrap_err();
        let text = downcast_arc::<String>(object).unwrap();
        assert_eq!(*text, "text");
    }

    #[test]
    fn test_managed_identity_is_reference_identity() {
        let a: ManagedRef = Arc::new(String::from("same"));
        let b: ManagedRef = Arc::new(String::from("same"));
        let a2 = a.clone();
        assert_eq!(ManagedIdentity::of(&a), ManagedIdentity::of(&a2));
        assert_ne!(ManagedIdentity::of(&a), ManagedIdentity::of(&b));
    }

    #[test]
    fn test_native_identity_null() {
        assert!(NativeIdentity::from_raw(std::ptr::null_mut()).is_null());
    }
}
