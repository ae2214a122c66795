//! Event system for stream synchronization.
//!
//! This module defines the events emitted while a stream is synced, the handler trait, and the
//! dispatcher that fans events out to registered handlers. Fetchers report progress and the
//! pipeline reports stage transitions and outcomes through it, so logging and statistics stay
//! out of the sync logic.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::sync::types::{SyncError, SyncStage, ValidationStatus};

/// Events that occur during stream synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The pipeline moved to a new stage
    StageEntered { stream: String, stage: SyncStage },
    /// A batch fetcher super-batch finished
    BatchProgress {
        label: String,
        completed: usize,
        total: usize,
        failed_batches: usize,
    },
    /// A log window finished (successfully or not)
    WindowProgress {
        windows_done: usize,
        total_windows: usize,
        from_block: u64,
        to_block: u64,
        logs_fetched: usize,
        failed: bool,
    },
    /// A sync call returned
    SyncCompleted {
        stream: String,
        records: usize,
        new_records: usize,
        height: u64,
        status: ValidationStatus,
    },
    /// A sync call failed or degraded
    SyncError {
        stream: String,
        error: String,
        fatal: bool,
    },
}

/// Trait for handling sync events.
///
/// Implementors receive every event dispatched during a sync call.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&self, event: &SyncEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Cloning shares the registered handlers.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Arc<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&self, event: &SyncEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Writes every event to the tracing subscriber.
#[derive(Debug, Default)]
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LoggingEventHandler {
    async fn handle(&self, event: &SyncEvent) -> Result<(), SyncError> {
        match event {
            SyncEvent::StageEntered { stream, stage } => {
                debug!(%stream, %stage, "Entered stage");
            }
            SyncEvent::BatchProgress {
                label,
                completed,
                total,
                failed_batches,
            } => {
                debug!(
                    "{}: fetched {}/{} ({} failed batches)",
                    label, completed, total, failed_batches
                );
            }
            SyncEvent::WindowProgress {
                windows_done,
                total_windows,
                from_block,
                to_block,
                logs_fetched,
                failed,
            } => {
                debug!(
                    "Log window {}/{} [{}..={}]: {} logs{}",
                    windows_done,
                    total_windows,
                    from_block,
                    to_block,
                    logs_fetched,
                    if *failed { " (failed)" } else { "" }
                );
            }
            SyncEvent::SyncCompleted {
                stream,
                records,
                new_records,
                height,
                status,
            } => match status {
                ValidationStatus::Valid => info!(
                    "Synced {} to height {}: {} records ({} new)",
                    stream, height, records, new_records
                ),
                ValidationStatus::Stale { reason } => warn!(
                    "Returning stale state for {} at height {}: {}",
                    stream, height, reason
                ),
            },
            SyncEvent::SyncError {
                stream,
                error,
                fatal,
            } => {
                if *fatal {
                    tracing::error!("Sync of {} failed: {}", stream, error);
                } else {
                    warn!("Sync of {} degraded: {}", stream, error);
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LoggingEventHandler"
    }
}
