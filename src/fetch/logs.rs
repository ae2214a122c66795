use futures::{StreamExt, stream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::FetchError;
use super::retry::{RetryPolicy, with_retry};
use crate::ledger::{LedgerSource, LogFilter, RawLog};
use crate::sync::events::{EventDispatcher, SyncEvent};

/// Sizing and retry behaviour of a [`LogBatchFetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogsConfig {
    pub blocks_per_request: u64,
    /// Windows in flight at once.
    pub concurrency_size: usize,
    pub retry: RetryPolicy,
    /// Window `i` waits `stagger * (i mod concurrency_size)` before its first attempt.
    pub stagger: Duration,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            blocks_per_request: 5_000,
            concurrency_size: 10,
            retry: RetryPolicy::new(5, Duration::from_millis(500)),
            stagger: Duration::from_millis(10),
        }
    }
}

/// Inclusive block range of one `eth_getLogs` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogWindow {
    pub from_block: u64,
    pub to_block: u64,
}

impl LogWindow {
    /// Split `[from_block, to_block]` into windows of at most `size` blocks.
    pub fn split(from_block: u64, to_block: u64, size: u64) -> Vec<LogWindow> {
        let size = size.max(1);
        let mut windows = Vec::new();
        let mut current = from_block;
        while current <= to_block {
            let end = current.saturating_add(size - 1).min(to_block);
            windows.push(LogWindow {
                from_block: current,
                to_block: end,
            });
            if end == u64::MAX {
                break;
            }
            current = end + 1;
        }
        windows
    }
}

#[derive(Debug)]
struct WindowResult {
    window: LogWindow,
    /// The window's upper bound after any clamp.
    effective_to: u64,
    result: Result<Vec<RawLog>, FetchError>,
}

/// Logs of a range in remote order, and how much of the range they cover.
#[derive(Debug, Default)]
pub struct LogFetchOutcome {
    pub logs: Vec<RawLog>,
    /// Highest `h` such that every block in `[from_block, h]` was fetched.
    /// `from_block - 1` when nothing was.
    pub covered_height: u64,
    pub failed_windows: Vec<LogWindow>,
    /// Lowest accepted height any window was clamped to.
    pub clamped_to: Option<u64>,
}

impl LogFetchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_windows.is_empty() && self.clamped_to.is_none()
    }
}

/// Fetches logs over a block range in fixed-size windows with bounded concurrency.
#[derive(Clone)]
pub struct LogBatchFetcher {
    config: LogsConfig,
    dispatcher: EventDispatcher,
}

impl LogBatchFetcher {
    pub fn new(config: LogsConfig, dispatcher: EventDispatcher) -> Self {
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &LogsConfig {
        &self.config
    }

    /// Fetch all logs matching `filter` in `[from_block, to_block]`.
    ///
    /// Duplicates are not removed. A window that fails every attempt is listed in
    /// `failed_windows` and ends the covered prefix.
    pub async fn fetch_logs(
        &self,
        source: &dyn LedgerSource,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> LogFetchOutcome {
        let windows = LogWindow::split(from_block, to_block, self.config.blocks_per_request);
        let total_windows = windows.len();
        let concurrency = self.config.concurrency_size.max(1);

        info!(
            "Fetching logs for blocks {}..={} in {} windows",
            from_block, to_block, total_windows
        );

        let mut results = stream::iter(windows.into_iter().enumerate())
            .map(|(index, window)| self.fetch_window(source, filter, index % concurrency, window))
            .buffered(concurrency);

        let mut outcome = LogFetchOutcome {
            covered_height: from_block.saturating_sub(1),
            ..Default::default()
        };
        let mut contiguous = true;
        let mut windows_done = 0;

        while let Some(window_result) = results.next().await {
            windows_done += 1;
            let WindowResult {
                window,
                effective_to,
                result,
            } = window_result;

            let (logs_fetched, failed) = match result {
                Ok(logs) => {
                    let count = logs.len();
                    outcome.logs.extend(logs);
                    if effective_to < window.to_block {
                        outcome.clamped_to = Some(
                            outcome
                                .clamped_to
                                .map_or(effective_to, |prev| prev.min(effective_to)),
                        );
                    }
                    if contiguous {
                        outcome.covered_height = outcome.covered_height.max(effective_to);
                        contiguous = effective_to == window.to_block;
                    }
                    (count, false)
                }
                Err(e) => {
                    warn!("Log window {}..={} failed: {}", window.from_block, window.to_block, e);
                    outcome.failed_windows.push(window);
                    contiguous = false;
                    (0, true)
                }
            };

            self.dispatcher
                .dispatch(&SyncEvent::WindowProgress {
                    windows_done,
                    total_windows,
                    from_block: window.from_block,
                    to_block: effective_to.min(window.to_block),
                    logs_fetched,
                    failed,
                })
                .await;
        }

        debug!(
            "Fetched {} logs, covered to {} ({} failed windows)",
            outcome.logs.len(),
            outcome.covered_height,
            outcome.failed_windows.len()
        );
        outcome
    }

    async fn fetch_window(
        &self,
        source: &dyn LedgerSource,
        filter: &LogFilter,
        slot: usize,
        window: LogWindow,
    ) -> WindowResult {
        if slot > 0 {
            tokio::time::sleep(self.config.stagger * slot as u32).await;
        }

        // `upper` only ever drops to an accepted height; `span` shrinks on range rejections
        let upper = AtomicU64::new(window.to_block);
        let span = AtomicU64::new((window.to_block - window.from_block).saturating_add(1));
        let unit = format!("logs {}..={}", window.from_block, window.to_block);

        let mut logs = Vec::new();
        let mut cursor = window.from_block;
        let result = loop {
            if cursor > upper.load(Ordering::SeqCst) {
                break Ok(());
            }
            let fetched = with_retry(self.config.retry, &unit, |_attempt| {
                let (upper, span) = (&upper, &span);
                async move {
                    loop {
                        let to_block = upper
                            .load(Ordering::SeqCst)
                            .min(cursor.saturating_add(span.load(Ordering::SeqCst) - 1));
                        if to_block < cursor {
                            return Ok((to_block, Vec::new()));
                        }
                        match source.get_logs(filter, cursor, to_block).await {
                            Ok(logs) => {
                                let logs = logs
                                    .into_iter()
                                    .filter(|log| (cursor..=to_block).contains(&log.block_number))
                                    .collect::<Vec<_>>();
                                return Ok((to_block, logs));
                            }
                            Err(e) if e.is_range_too_large() && to_block > cursor => {
                                let halved = (to_block - cursor + 1) / 2;
                                span.fetch_min(halved, Ordering::SeqCst);
                                debug!(
                                    "Log range {}..={} too large, retrying {} blocks at a time",
                                    cursor, to_block, halved
                                );
                            }
                            Err(e) => {
                                if let Some(accepted) = e.accepted_block_limit() {
                                    let previous = upper.fetch_min(accepted, Ordering::SeqCst);
                                    if accepted < previous {
                                        debug!(
                                            "Clamping log window {}..={} to accepted block {}",
                                            window.from_block, previous, accepted
                                        );
                                    }
                                }
                                return Err(e);
                            }
                        }
                    }
                }
            })
            .await;

            match fetched {
                Ok((to_block, fetched)) => {
                    logs.extend(fetched);
                    if to_block < cursor || to_block == u64::MAX {
                        break Ok(());
                    }
                    cursor = to_block + 1;
                }
                Err(e) => break Err(e),
            }
        };
        let result = result.map(|()| logs).map_err(|source| FetchError {
            unit,
            attempts: self.config.retry.max_attempts.max(1),
            source,
        });

        let clamped = upper.load(Ordering::SeqCst);
        let effective_to = if clamped < window.from_block {
            // nothing in this window is accepted yet; coverage cannot pass the accepted height
            clamped
        } else {
            clamped.min(window.to_block)
        };

        WindowResult {
            window,
            effective_to,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BlockInfo, BlockTag, LedgerError, ReceiptInfo, TransactionInfo};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Serves one log per block in `1..=head` and rejects ranges past `accepted`.
    struct WindowLedger {
        head: u64,
        accepted: Option<u64>,
        failing_from: Option<u64>,
        /// Widest range answered before "too many results".
        max_span: Option<u64>,
        requests: Mutex<Vec<(u64, u64)>>,
    }

    impl WindowLedger {
        fn new(head: u64) -> Self {
            Self {
                head,
                accepted: None,
                failing_from: None,
                max_span: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    fn log_at(block_number: u64) -> RawLog {
        RawLog {
            address: "0xpool".into(),
            topics: vec![],
            data: "0x".into(),
            block_number,
            transaction_hash: format!("0x{block_number:x}"),
            log_index: 0,
            removed: false,
        }
    }

    #[async_trait]
    impl LedgerSource for WindowLedger {
        async fn get_logs(
            &self,
            _filter: &LogFilter,
            from_block: u64,
            to_block: u64,
        ) -> Result<Vec<RawLog>, LedgerError> {
            self.requests.lock().push((from_block, to_block));
            if Some(from_block) == self.failing_from {
                return Err(LedgerError::InvalidResponse("upstream timeout".into()));
            }
            if self.max_span.is_some_and(|max| to_block - from_block + 1 > max) {
                return Err(LedgerError::Rpc {
                    code: -32005,
                    message: "query returned more than 10000 results".into(),
                });
            }
            if let Some(accepted) = self.accepted {
                if to_block > accepted {
                    return Err(LedgerError::Rpc {
                        code: -32000,
                        message: format!(
                            "requested to block {to_block} after last accepted block {accepted}"
                        ),
                    });
                }
            }
            // a sloppy node that answers with a little more than asked
            Ok((from_block..=(to_block + 1).min(self.head)).map(log_at).collect())
        }

        async fn get_block(&self, _tag: BlockTag) -> Result<Option<BlockInfo>, LedgerError> {
            Ok(None)
        }

        async fn get_transaction(&self, _hash: &str) -> Result<Option<TransactionInfo>, LedgerError> {
            Ok(None)
        }

        async fn get_transaction_receipt(
            &self,
            _hash: &str,
        ) -> Result<Option<ReceiptInfo>, LedgerError> {
            Ok(None)
        }

        async fn get_block_number(&self) -> Result<u64, LedgerError> {
            Ok(self.head)
        }
    }

    fn fetcher(blocks_per_request: u64) -> LogBatchFetcher {
        LogBatchFetcher::new(
            LogsConfig {
                blocks_per_request,
                concurrency_size: 3,
                retry: RetryPolicy::new(5, Duration::from_millis(1)),
                stagger: Duration::from_millis(1),
            },
            EventDispatcher::new(),
        )
    }

    #[test]
    fn windows_cover_range_inclusively() {
        let windows = LogWindow::split(10, 34, 10);
        assert_eq!(
            windows,
            vec![
                LogWindow { from_block: 10, to_block: 19 },
                LogWindow { from_block: 20, to_block: 29 },
                LogWindow { from_block: 30, to_block: 34 },
            ]
        );
        assert!(LogWindow::split(5, 4, 10).is_empty());
        assert_eq!(LogWindow::split(7, 7, 10).len(), 1);
    }

    #[tokio::test]
    async fn fetches_every_window_in_order() {
        let ledger = WindowLedger::new(100);
        let outcome = fetcher(10).fetch_logs(&ledger, &LogFilter::default(), 1, 45).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.covered_height, 45);
        let blocks: Vec<u64> = outcome.logs.iter().map(|l| l.block_number).collect();
        assert_eq!(blocks, (1..=45).collect::<Vec<_>>());
        assert_eq!(ledger.requests.lock().len(), 5);
    }

    #[tokio::test]
    async fn clamps_window_to_accepted_block() {
        let mut ledger = WindowLedger::new(100);
        ledger.accepted = Some(27);
        let outcome = fetcher(10).fetch_logs(&ledger, &LogFilter::default(), 1, 45).await;

        assert!(outcome.failed_windows.is_empty());
        assert_eq!(outcome.clamped_to, Some(27));
        assert_eq!(outcome.covered_height, 27);
        assert!(outcome.logs.iter().all(|l| l.block_number <= 27));
        assert_eq!(outcome.logs.len(), 27);

        // the straddling window retried with the lower bound; windows past it stop querying
        let requests = ledger.requests.lock();
        assert!(requests.contains(&(21, 27)));
        assert_eq!(requests.iter().filter(|(from, _)| *from == 31).count(), 1);
        assert_eq!(requests.iter().filter(|(from, _)| *from == 41).count(), 1);
    }

    #[tokio::test]
    async fn oversized_range_is_halved_until_answered() {
        let mut ledger = WindowLedger::new(100);
        ledger.max_span = Some(12);
        let outcome = fetcher(40).fetch_logs(&ledger, &LogFilter::default(), 1, 80).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.covered_height, 80);
        let blocks: Vec<u64> = outcome.logs.iter().map(|l| l.block_number).collect();
        assert_eq!(blocks, (1..=80).collect::<Vec<_>>());

        // each window is refused at 40 and 20 blocks, then read in tens
        let requests = ledger.requests.lock();
        assert_eq!(requests.iter().filter(|(from, to)| to - from + 1 > 12).count(), 4);
        assert!(requests.contains(&(1, 10)));
        assert!(requests.contains(&(31, 40)));
        assert!(requests.contains(&(71, 80)));
    }

    #[tokio::test]
    async fn failed_window_ends_covered_prefix() {
        let mut ledger = WindowLedger::new(100);
        ledger.failing_from = Some(11);
        let outcome = fetcher(10).fetch_logs(&ledger, &LogFilter::default(), 1, 30).await;

        assert_eq!(
            outcome.failed_windows,
            vec![LogWindow { from_block: 11, to_block: 20 }]
        );
        assert_eq!(outcome.covered_height, 10);
        // siblings still contribute their logs
        assert!(outcome.logs.iter().any(|l| l.block_number == 25));
        let attempts = ledger
            .requests
            .lock()
            .iter()
            .filter(|(from, _)| *from == 11)
            .count();
        assert_eq!(attempts, 5);
    }
}
