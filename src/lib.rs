//! Client-side event synchronization for a privacy-pool protocol.
//!
//! [`sync::EventSyncPipeline`] rebuilds each configured event stream from the local cache, a
//! remote snapshot and the live ledger, anchors deposit streams against the pool's known roots,
//! and persists the reconciled result.

pub mod cache;
pub mod config;
pub mod fetch;
pub mod ledger;
pub mod merkle;
pub mod relayer;
pub mod sync;
pub mod utils;
