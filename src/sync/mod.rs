//! Stream Synchronization Module
//!
//! This module provides the core logic for reconstructing a protocol event stream from the ledger.
//! It is composed of several submodules, each responsible for a specific aspect of the sync process:
//!
//! - `orchestrator`: The `EventSyncPipeline`, sole entry point for "latest state of stream X".
//! - `events`: Event types and handler traits used to observe a sync call without coupling to it.
//! - `log_processor`: Decodes raw ledger logs into typed event records.
//! - `progress_tracker`: Accumulates per-session statistics from dispatched events.
//! - `records`: The event record type and its ordering, identity and merge rules.
//! - `strategies`: Pluggable live sources (chain logs, trusted relayer).
//! - `streams`: Stream kinds, canonical keys and the per-kind strategy table.
//! - `types`: Stages, validation results and the caller-facing error.
//! - `validation`: The per-kind validator registry and the leaf contiguity check.

/// Event system for decoupled observation during sync
pub mod events;
/// Raw log decoding
pub mod log_processor;
/// Main coordinator for the stream sync process
pub mod orchestrator;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Event records and merge rules
pub mod records;
/// Pluggable live sync strategies
pub mod strategies;
/// Stream kinds and keys
pub mod streams;
pub mod types;
/// Record validation
pub mod validation;

pub use orchestrator::*;
pub use records::{EventPayload, EventRecord, GovernanceEvent, RecordId, merge_records};
pub use streams::{StreamKey, StreamKind, StreamTarget};
pub use types::*;
