//! Error types for ABI calls

use crate::hresult::HResult;

/// Result type for ABI calls
pub type AbiResult<T> = Result<T, AbiError>;

/// Failures observed while calling into a native object
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    /// A null interface pointer was supplied where an object was required
    #[error("Null interface pointer")]
    NullPointer,

    /// The native call returned a failure status
    #[error("Native call failed: {0}")]
    Failed(HResult),

    /// The runtime class name was not valid UTF-8
    #[error("Runtime class name is not valid UTF-8")]
    InvalidUtf8,
}

impl AbiError {
    /// The status code to report if this error has to cross back into native code
    pub fn hresult(&self) -> HResult {
        match self {
            AbiError::NullPointer => HResult::E_POINTER,
            AbiError::Failed(hr) => *hr,
            AbiError::InvalidUtf8 => HResult::E_FAIL,
        }
    }
}

impl From<HResult> for AbiError {
    fn from(hr: HResult) -> Self {
        AbiError::Failed(hr)
    }
}
