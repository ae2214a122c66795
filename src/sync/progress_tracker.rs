//! Progress tracking for stream synchronization.
//!
//! This module provides the `SyncProgressTracker`, an event handler that accumulates per-session
//! statistics: log windows and batches fetched, failures, and per-stream outcomes. It is
//! registered on the dispatcher next to the logging handler and queried for a summary once the
//! runner has synced every stream.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::info;

use crate::sync::events::{SyncEvent, SyncEventHandler};
use crate::sync::types::{SyncError, ValidationStatus};

/// Service for tracking synchronization progress
#[derive(Debug, Default)]
pub struct SyncProgressTracker {
    inner: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    windows_fetched: usize,
    windows_failed: usize,
    logs_fetched: usize,
    highest_block_covered: u64,
    items_fetched: usize,
    batches_failed: usize,
    streams: BTreeMap<String, StreamStats>,
}

/// Per-stream outcome as last reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    pub records: usize,
    pub new_records: usize,
    pub height: u64,
    pub stale: bool,
    pub errors: usize,
}

impl SyncProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get sync statistics as a SyncStats struct
    pub fn get_stats(&self) -> SyncStats {
        let state = self.inner.lock();
        SyncStats {
            windows_fetched: state.windows_fetched,
            windows_failed: state.windows_failed,
            logs_fetched: state.logs_fetched,
            highest_block_covered: state.highest_block_covered,
            items_fetched: state.items_fetched,
            batches_failed: state.batches_failed,
            streams: state.streams.clone(),
        }
    }

    pub fn log_summary(&self) {
        info!("Sync session: {}", self.get_stats().summary());
    }
}

#[async_trait::async_trait]
impl SyncEventHandler for SyncProgressTracker {
    async fn handle(&self, event: &SyncEvent) -> Result<(), SyncError> {
        let mut state = self.inner.lock();
        match event {
            SyncEvent::WindowProgress {
                to_block,
                logs_fetched,
                failed,
                ..
            } => {
                if *failed {
                    state.windows_failed += 1;
                } else {
                    state.windows_fetched += 1;
                    state.logs_fetched += logs_fetched;
                    state.highest_block_covered = state.highest_block_covered.max(*to_block);
                }
            }
            // batch totals are cumulative per fetch call, so count the final report only
            SyncEvent::BatchProgress {
                completed,
                total,
                failed_batches,
                ..
            } => {
                if completed == total {
                    state.items_fetched += total;
                    state.batches_failed += failed_batches;
                }
            }
            SyncEvent::SyncCompleted {
                stream,
                records,
                new_records,
                height,
                status,
            } => {
                let entry = state.streams.entry(stream.clone()).or_insert(StreamStats {
                    records: 0,
                    new_records: 0,
                    height: 0,
                    stale: false,
                    errors: 0,
                });
                entry.records = *records;
                entry.new_records += new_records;
                entry.height = entry.height.max(*height);
                entry.stale = matches!(status, ValidationStatus::Stale { .. });
            }
            SyncEvent::SyncError { stream, .. } => {
                let entry = state.streams.entry(stream.clone()).or_insert(StreamStats {
                    records: 0,
                    new_records: 0,
                    height: 0,
                    stale: true,
                    errors: 0,
                });
                entry.errors += 1;
            }
            SyncEvent::StageEntered { .. } => {}
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "SyncProgressTracker"
    }
}

/// Statistics about the sync session
#[derive(Debug, Clone)]
pub struct SyncStats {
    pub windows_fetched: usize,
    pub windows_failed: usize,
    pub logs_fetched: usize,
    pub highest_block_covered: u64,
    pub items_fetched: usize,
    pub batches_failed: usize,
    pub streams: BTreeMap<String, StreamStats>,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        let stale = self.streams.values().filter(|s| s.stale).count();
        format!(
            "{} streams ({} stale), {} log windows ({} failed), {} logs, {} lookups ({} failed batches), covered to block {}",
            self.streams.len(),
            stale,
            self.windows_fetched,
            self.windows_failed,
            self.logs_fetched,
            self.items_fetched,
            self.batches_failed,
            self.highest_block_covered
        )
    }
}
