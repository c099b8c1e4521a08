//! Unified exit codes. Part of the public contract: automation keys off
//! these to distinguish a denial from an operational failure.

pub const SUCCESS: i32 = 0;
/// The gate denied (enforce mode only; observe-only denials exit 0).
pub const DENIED: i32 = 1;
/// Config or backend failure.
pub const INTERNAL_ERROR: i32 = 2;
