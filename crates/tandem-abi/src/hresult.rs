//! Status codes returned across the native boundary

use std::fmt;

/// 32-bit status code (negative values are failures)
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    /// Success
    pub const S_OK: HResult = HResult(0);
    /// The object does not implement the requested interface
    pub const E_NOINTERFACE: HResult = HResult(0x8000_4002_u32 as i32);
    /// A required pointer argument was null or did not resolve to a live object
    pub const E_POINTER: HResult = HResult(0x8000_4003_u32 as i32);
    /// Unspecified failure
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    /// Catastrophic failure
    pub const E_UNEXPECTED: HResult = HResult(0x8000_ffff_u32 as i32);

    /// True for success codes
    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// True for failure codes
    #[inline]
    pub const fn is_err(self) -> bool {
        self.0 < 0
    }

    /// Convert into a `Result`, keeping the failing code
    #[inline]
    pub fn ok(self) -> Result<(), HResult> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Raw code as unsigned (the way native tooling prints it)
    #[inline]
    pub const fn code(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult({:#010x})", self.code())
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            HResult::S_OK => "S_OK",
            HResult::E_NOINTERFACE => "E_NOINTERFACE",
            HResult::E_POINTER => "E_POINTER",
            HResult::E_FAIL => "E_FAIL",
            HResult::E_UNEXPECTED => "E_UNEXPECTED",
            _ => return write!(f, "{:#010x}", self.code()),
        };
        f.write_str(name)
    }
}
