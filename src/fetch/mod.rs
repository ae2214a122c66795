//! Batched, retried remote fetching.
//!
//! - `retry`: the bounded constant-delay retry combinator shared by every fetcher.
//! - `batch`: fetches lists of identifiers (blocks, transactions, receipts) in staggered,
//!   concurrency-limited batches.
//! - `logs`: fetches event logs over a block range in fixed-size windows, clamping a window when
//!   the ledger reports a lower accepted height and halving requests it refuses as too large.
//!
//! Fetchers recover transient failures locally and report exhausted retries per batch or window,
//! so callers can keep whatever did succeed.

/// Staggered batch fetcher for identifier lists
pub mod batch;
/// Windowed log fetcher
pub mod logs;
/// Bounded retry combinator
pub mod retry;

use crate::ledger::LedgerError;

pub use batch::{BatchConfig, BatchFetchOutcome, BatchFetcher, BatchOutcome};
pub use logs::{LogBatchFetcher, LogFetchOutcome, LogWindow, LogsConfig};
pub use retry::{ConstantWithMaxRetryCount, RetryPolicy, with_retry};

/// A batch or window that failed on every attempt.
#[derive(Debug, thiserror::Error)]
#[error("{unit} failed after {attempts} attempts: {source}")]
pub struct FetchError {
    pub unit: String,
    pub attempts: usize,
    #[source]
    pub source: LedgerError,
}
