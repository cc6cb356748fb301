//! Interface identifiers
//!
//! Every interface in the native object model is named by a 128-bit GUID.
//! The layout matches the C `GUID` struct so that pointers to it can be
//! handed straight to native `QueryInterface` implementations.

use std::fmt;
use std::str::FromStr;

/// 128-bit interface identifier
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid {
    /// First 32 bits
    pub data1: u32,
    /// Next 16 bits
    pub data2: u16,
    /// Next 16 bits
    pub data3: u16,
    /// Final 64 bits, stored big-endian
    pub data4: [u8; 8],
}

impl Guid {
    /// The all-zero GUID
    pub const ZERO: Guid = Guid::from_u128(0);

    /// Build a GUID from its canonical 128-bit value
    ///
    /// `0x00000000_0000_0000_C000_000000000046` yields
    /// `00000000-0000-0000-c000-000000000046`.
    pub const fn from_u128(value: u128) -> Self {
        Self {
            data1: (value >> 96) as u32,
            data2: ((value >> 80) & 0xffff) as u16,
            data3: ((value >> 64) & 0xffff) as u16,
            data4: (value as u64).to_be_bytes(),
        }
    }

    /// Canonical 128-bit value
    pub const fn to_u128(&self) -> u128 {
        ((self.data1 as u128) << 96)
            | ((self.data2 as u128) << 80)
            | ((self.data3 as u128) << 64)
            | (u64::from_be_bytes(self.data4) as u128)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

/// Error returned when a string is not in registry format
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid GUID literal: {0}")]
pub struct ParseGuidError(pub String);

impl FromStr for Guid {
    type Err = ParseGuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim_start_matches('{').trim_end_matches('}');
        let groups: Vec<&str> = trimmed.split('-').collect();
        let lengths = [8, 4, 4, 4, 12];
        if groups.len() != lengths.len()
            || groups.iter().zip(lengths).any(|(g, len)| g.len() != len)
        {
            return Err(ParseGuidError(s.to_string()));
        }

        let hex: String = groups.concat();
        u128::from_str_radix(&hex, 16)
            .map(Guid::from_u128)
            .map_err(|_| ParseGuidError(s.to_string()))
    }
}
