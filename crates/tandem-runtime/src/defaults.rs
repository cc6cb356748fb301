//! Default tuning constants

/// Sentinel registrations between automatic finalization passes
pub const DEFAULT_FINALIZER_THRESHOLD: usize = 256;

/// First id handed out by a handle table (0 is the null handle)
pub const FIRST_HANDLE_ID: u64 = 1;
