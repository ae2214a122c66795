use crate::fetch::{BatchFetcher, LogBatchFetcher, with_retry};
use crate::ledger::{LedgerSource, LogFilter};
use crate::relayer::{RelayerEventClient, events_request};
use crate::sync::log_processor::LogProcessor;
use crate::sync::records::{EventPayload, EventRecord};
use crate::sync::streams::{Enrichment, StreamTarget};
use crate::sync::types::SyncError;

use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records a live source produced for one stream, and how far they reach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveBatch {
	pub records: Vec<EventRecord>,
	/// Every record at or below this block has been fetched.
	pub covered_height: u64,
	/// Why coverage stopped short of the source's head, if it did.
	pub shortfall: Option<String>,
}

impl LiveBatch {
	fn up_to_date(from_block: u64) -> Self {
		Self {
			records: Vec::new(),
			covered_height: from_block.saturating_sub(1),
			shortfall: None,
		}
	}
}

/// Trait for the live stage of a sync call
#[async_trait::async_trait]
pub trait LiveSyncStrategy: Send + Sync {
	/// Fetch records of `target` from `from_block` on.
	async fn fetch(&self, target: &StreamTarget, from_block: u64) -> Result<LiveBatch, SyncError>;

	/// Network this source is bound to, if any. Checked before any remote call.
	fn net_id(&self) -> Option<u64> {
		None
	}

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// Strategy reading logs straight from the ledger and enriching them with lookups
pub struct ChainLogSync {
	source: Arc<dyn LedgerSource>,
	log_fetcher: LogBatchFetcher,
	batch_fetcher: BatchFetcher,
}

impl ChainLogSync {
	pub fn new(
		source: Arc<dyn LedgerSource>,
		log_fetcher: LogBatchFetcher,
		batch_fetcher: BatchFetcher,
	) -> Self {
		Self {
			source,
			log_fetcher,
			batch_fetcher,
		}
	}

	async fn head(&self) -> Result<u64, SyncError> {
		let source = &self.source;
		let head = with_retry(self.log_fetcher.config().retry, "block number", |_attempt| {
			source.get_block_number()
		})
		.await?;
		Ok(head)
	}

	/// Fill in fields the logs do not carry.
	///
	/// Returns the lowest block whose records could not be completed, if any.
	async fn enrich(&self, enrichment: Enrichment, records: &mut [EventRecord]) -> Option<u64> {
		match enrichment {
			Enrichment::None => None,
			Enrichment::TransactionSender => {
				let hashes: Vec<String> = records
					.iter()
					.map(|r| r.transaction_hash.clone())
					.unique()
					.collect();
				let outcome = self
					.batch_fetcher
					.fetch_transactions(self.source.as_ref(), &hashes)
					.await;

				let senders: HashMap<&str, &str> = outcome
					.pairs()
					.map(|(hash, tx)| (hash.as_str(), tx.from.as_str()))
					.collect();
				for record in records.iter_mut() {
					if let (EventPayload::Deposit { from, .. }, Some(sender)) = (
						&mut record.payload,
						senders.get(record.transaction_hash.as_str()),
					) {
						*from = sender.to_ascii_lowercase();
					}
				}

				let failed: Vec<&String> = outcome.failed_ids();
				records
					.iter()
					.filter(|r| failed.contains(&&r.transaction_hash))
					.map(|r| r.block_number)
					.min()
			}
			Enrichment::BlockTimestamp => {
				let numbers: Vec<u64> = records.iter().map(|r| r.block_number).unique().collect();
				let outcome = self
					.batch_fetcher
					.fetch_blocks(self.source.as_ref(), &numbers)
					.await;

				let timestamps: HashMap<u64, u64> = outcome
					.pairs()
					.map(|(number, block)| (*number, block.timestamp))
					.collect();
				for record in records.iter_mut() {
					if let (EventPayload::Withdrawal { timestamp, .. }, Some(block_time)) =
						(&mut record.payload, timestamps.get(&record.block_number))
					{
						*timestamp = *block_time;
					}
				}

				outcome.failed_ids().into_iter().copied().min()
			}
		}
	}
}

#[async_trait::async_trait]
impl LiveSyncStrategy for ChainLogSync {
	async fn fetch(&self, target: &StreamTarget, from_block: u64) -> Result<LiveBatch, SyncError> {
		let stream = target.key.to_string();
		let strategy = target.kind().strategy();

		let head = self.head().await?;
		if from_block > head {
			debug!("{} is already at head {}", stream, head);
			return Ok(LiveBatch::up_to_date(from_block));
		}

		info!(
			stream = %stream,
			from_block,
			to_block = head,
			"Fetching live {} logs",
			target.kind()
		);

		let filter = LogFilter::new(vec![target.address.clone()], strategy.topics());
		let outcome = self
			.log_fetcher
			.fetch_logs(self.source.as_ref(), &filter, from_block, head)
			.await;

		let mut covered_height = outcome.covered_height;
		let mut shortfalls = Vec::new();
		if let Some(window) = outcome.failed_windows.first() {
			shortfalls.push(format!(
				"{} log windows failed, first {}..={}",
				outcome.failed_windows.len(),
				window.from_block,
				window.to_block
			));
		}

		// records past a failed window would leave a hole below them
		let processor = LogProcessor::new(target.kind(), stream.clone());
		let mut records: Vec<EventRecord> = processor
			.process_logs_batch(&outcome.logs)?
			.into_iter()
			.filter(|record| record.block_number <= covered_height)
			.collect();
		records.sort_by(|a, b| a.chain_order(b));

		if let Some(lowest_failed) = self.enrich(strategy.enrichment, &mut records).await {
			warn!(
				"Enrichment for {} failed at block {}, holding coverage below it",
				stream, lowest_failed
			);
			covered_height = covered_height.min(lowest_failed.saturating_sub(1));
			records.retain(|record| record.block_number < lowest_failed);
			shortfalls.push(format!("enrichment failed at block {lowest_failed}"));
		}

		debug!(
			"{} live records for {} cover blocks {}..={}",
			records.len(),
			stream,
			from_block,
			covered_height
		);

		Ok(LiveBatch {
			records,
			covered_height,
			shortfall: (!shortfalls.is_empty()).then(|| shortfalls.join("; ")),
		})
	}

	fn name(&self) -> &'static str {
		"ChainLogSync"
	}
}

/// Strategy taking live records from a trusted relayer
pub struct RelayerSync {
	client: RelayerEventClient,
	net_id: u64,
}

impl RelayerSync {
	pub fn new(client: RelayerEventClient, net_id: u64) -> Self {
		Self { client, net_id }
	}
}

#[async_trait::async_trait]
impl LiveSyncStrategy for RelayerSync {
	async fn fetch(&self, target: &StreamTarget, from_block: u64) -> Result<LiveBatch, SyncError> {
		let pool = target
			.key
			.pool
			.as_ref()
			.map(|pool| (pool.currency.as_str(), pool.amount.as_str()));
		let fetched = self
			.client
			.fetch_events(events_request(target.kind(), pool, from_block))
			.await?;

		let covered_height = fetched.last_sync_block.max(from_block.saturating_sub(1));
		let records: Vec<EventRecord> = fetched
			.records
			.into_iter()
			.filter(|record| record.block_number >= from_block && record.block_number <= covered_height)
			.collect();

		info!(
			"Relayer returned {} records for {} up to block {}",
			records.len(),
			target.key,
			covered_height
		);

		Ok(LiveBatch {
			records,
			covered_height,
			shortfall: None,
		})
	}

	fn net_id(&self) -> Option<u64> {
		Some(self.net_id)
	}

	fn name(&self) -> &'static str {
		"RelayerSync"
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::fetch::{BatchConfig, LogsConfig, RetryPolicy};
	use crate::ledger::{BlockInfo, BlockTag, LedgerError, RawLog, ReceiptInfo, TransactionInfo};
	use crate::sync::events::EventDispatcher;
	use crate::sync::log_processor::fixtures::{deposit_log, withdrawal_log};
	use crate::sync::streams::{StreamKey, StreamKind};
	use parking_lot::Mutex;
	use std::collections::HashSet;
	use std::time::Duration;

	/// Serves fixed logs; lookups for listed hashes or blocks always fail.
	#[derive(Default)]
	struct ScriptedLedger {
		head: u64,
		logs: Vec<RawLog>,
		failing_transactions: HashSet<String>,
		failing_blocks: HashSet<u64>,
		log_requests: Mutex<usize>,
	}

	#[async_trait::async_trait]
	impl LedgerSource for ScriptedLedger {
		async fn get_logs(
			&self,
			_filter: &LogFilter,
			from_block: u64,
			to_block: u64,
		) -> Result<Vec<RawLog>, LedgerError> {
			*self.log_requests.lock() += 1;
			Ok(self
				.logs
				.iter()
				.filter(|log| (from_block..=to_block).contains(&log.block_number))
				.cloned()
				.collect())
		}

		async fn get_block(&self, tag: BlockTag) -> Result<Option<BlockInfo>, LedgerError> {
			let BlockTag::Number(number) = tag else {
				return Ok(None);
			};
			if self.failing_blocks.contains(&number) {
				return Err(LedgerError::InvalidResponse("block unavailable".into()));
			}
			Ok(Some(BlockInfo {
				number,
				timestamp: 1_700_000_000 + number,
				hash: None,
			}))
		}

		async fn get_transaction(&self, hash: &str) -> Result<Option<TransactionInfo>, LedgerError> {
			if self.failing_transactions.contains(hash) {
				return Err(LedgerError::InvalidResponse("transaction unavailable".into()));
			}
			Ok(Some(TransactionInfo {
				hash: hash.to_string(),
				from: "0x00000000000000000000000000000000000000EE".to_string(),
				to: None,
				block_number: None,
			}))
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

	fn chain_sync(ledger: ScriptedLedger) -> (Arc<ScriptedLedger>, ChainLogSync) {
		let ledger = Arc::new(ledger);
		let retry = RetryPolicy::new(2, Duration::from_millis(1));
		let logs = LogBatchFetcher::new(
			LogsConfig {
				blocks_per_request: 50,
				concurrency_size: 2,
				retry,
				stagger: Duration::ZERO,
			},
			EventDispatcher::new(),
		);
		let batch = BatchFetcher::new(
			BatchConfig {
				batch_size: 1,
				concurrency_size: 4,
				retry,
				stagger: Duration::ZERO,
			},
			EventDispatcher::new(),
		);
		(ledger.clone(), ChainLogSync::new(ledger, logs, batch))
	}

	fn deposits_target() -> StreamTarget {
		StreamTarget::new(
			StreamKey::pool(StreamKind::Deposits, 1, "eth", "0.1"),
			"0x00000000000000000000000000000000000000aa",
			100,
		)
	}

	#[tokio::test]
	async fn deposits_get_their_sender() {
		let (_, strategy) = chain_sync(ScriptedLedger {
			head: 200,
			logs: vec![deposit_log(100, 0, 0), deposit_log(105, 0, 1), deposit_log(110, 0, 2)],
			..Default::default()
		});

		let batch = strategy.fetch(&deposits_target(), 100).await.unwrap();
		assert_eq!(batch.covered_height, 200);
		assert_eq!(batch.shortfall, None);
		assert_eq!(batch.records.len(), 3);
		for record in &batch.records {
			let EventPayload::Deposit { from, .. } = &record.payload else {
				panic!("not a deposit");
			};
			assert_eq!(from, "0x00000000000000000000000000000000000000ee");
		}
	}

	#[tokio::test]
	async fn failed_enrichment_holds_coverage_below_it() {
		let failing = deposit_log(150, 0, 2);
		let (_, strategy) = chain_sync(ScriptedLedger {
			head: 200,
			logs: vec![deposit_log(100, 0, 0), deposit_log(120, 0, 1), failing.clone(), deposit_log(180, 0, 3)],
			failing_transactions: HashSet::from([failing.transaction_hash.clone()]),
			..Default::default()
		});

		let batch = strategy.fetch(&deposits_target(), 100).await.unwrap();
		assert_eq!(batch.covered_height, 149);
		let blocks: Vec<u64> = batch.records.iter().map(|r| r.block_number).collect();
		assert_eq!(blocks, vec![100, 120]);
		assert!(batch.shortfall.unwrap().contains("block 150"));
	}

	#[tokio::test]
	async fn withdrawals_get_block_timestamps() {
		let (_, strategy) = chain_sync(ScriptedLedger {
			head: 200,
			logs: vec![withdrawal_log(130, 1), withdrawal_log(170, 0)],
			failing_blocks: HashSet::from([170]),
			..Default::default()
		});
		let target = StreamTarget::new(
			StreamKey::pool(StreamKind::Withdrawals, 1, "eth", "0.1"),
			"0x00000000000000000000000000000000000000aa",
			100,
		);

		let batch = strategy.fetch(&target, 100).await.unwrap();
		assert_eq!(batch.covered_height, 169);
		assert_eq!(batch.records.len(), 1);
		assert!(matches!(
			batch.records[0].payload,
			EventPayload::Withdrawal { timestamp: 1_700_000_130, .. }
		));
	}

	#[tokio::test]
	async fn nothing_to_fetch_past_head() {
		let (ledger, strategy) = chain_sync(ScriptedLedger {
			head: 200,
			..Default::default()
		});
		let batch = strategy.fetch(&deposits_target(), 201).await.unwrap();
		assert_eq!(batch, LiveBatch::up_to_date(201));
		assert_eq!(*ledger.log_requests.lock(), 0);
	}
}
