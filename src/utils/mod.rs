//!
//! Utility module for the sync layer.
//!
//! Hex and quantity helpers shared by the ledger client, the record decoders and the cache tier.
/// Hex string and JSON-RPC quantity helpers
pub mod hex;

pub use self::hex::{normalize_hex, parse_quantity, strip_0x, to_quantity};
