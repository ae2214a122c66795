use futures::future::{join_all, try_join_all};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::FetchError;
use super::retry::{RetryPolicy, with_retry};
use crate::ledger::{BlockInfo, BlockTag, LedgerError, LedgerSource, ReceiptInfo, TransactionInfo};
use crate::sync::events::{EventDispatcher, SyncEvent};

/// Sizing and retry behaviour of a [`BatchFetcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
	/// Identifiers per batch.
	pub batch_size: usize,
	/// Batches run concurrently within one super-batch.
	pub concurrency_size: usize,
	pub retry: RetryPolicy,
	/// Batch `k` of a super-batch waits `stagger * k` before its first attempt.
	pub stagger: Duration,
}

impl Default for BatchConfig {
	fn default() -> Self {
		Self {
			batch_size: 10,
			concurrency_size: 10,
			retry: RetryPolicy::new(5, Duration::from_millis(500)),
			stagger: Duration::from_millis(40),
		}
	}
}

/// One batch and what happened to it.
#[derive(Debug)]
pub struct BatchOutcome<I, T> {
	pub ids: Vec<I>,
	/// One value per id, in id order, or the error of the last attempt.
	pub result: Result<Vec<T>, FetchError>,
}

/// Per-batch results, in input order.
#[derive(Debug)]
pub struct BatchFetchOutcome<I, T> {
	pub outcomes: Vec<BatchOutcome<I, T>>,
}

impl<I, T> BatchFetchOutcome<I, T> {
	/// `(id, value)` for every id whose batch succeeded, in input order.
	pub fn pairs(&self) -> impl Iterator<Item = (&I, &T)> {
		self.outcomes.iter().flat_map(|outcome| match &outcome.result {
			Ok(values) => outcome.ids.iter().zip(values.iter()).collect::<Vec<_>>(),
			Err(_) => Vec::new(),
		})
	}

	pub fn values(&self) -> Vec<&T> {
		self.pairs().map(|(_, value)| value).collect()
	}

	pub fn failed_ids(&self) -> Vec<&I> {
		self.outcomes
			.iter()
			.filter(|outcome| outcome.result.is_err())
			.flat_map(|outcome| outcome.ids.iter())
			.collect()
	}

	pub fn errors(&self) -> impl Iterator<Item = &FetchError> {
		self.outcomes
			.iter()
			.filter_map(|outcome| outcome.result.as_ref().err())
	}

	pub fn is_complete(&self) -> bool {
		self.outcomes.iter().all(|outcome| outcome.result.is_ok())
	}
}

/// Fetches identifiers in staggered, concurrency-limited batches.
///
/// Super-batches of `concurrency_size` batches run one after another; the batches inside one
/// run concurrently and retry as units. A batch that exhausts its retries is reported failed
/// without affecting its siblings.
#[derive(Clone)]
pub struct BatchFetcher {
	config: BatchConfig,
	dispatcher: EventDispatcher,
}

impl BatchFetcher {
	pub fn new(config: BatchConfig, dispatcher: EventDispatcher) -> Self {
		Self { config, dispatcher }
	}

	pub fn config(&self) -> &BatchConfig {
		&self.config
	}

	/// Fetch every id with `fetch_one`. `Ok(None)` from the ledger fails the id's batch.
	pub async fn fetch<I, T, F, Fut>(
		&self,
		label: &str,
		ids: &[I],
		fetch_one: F,
	) -> BatchFetchOutcome<I, T>
	where
		I: Clone + Display + Send + Sync,
		T: Send,
		F: Fn(I) -> Fut + Send + Sync,
		Fut: Future<Output = Result<Option<T>, LedgerError>> + Send,
	{
		let batches: Vec<&[I]> = ids.chunks(self.config.batch_size.max(1)).collect();
		let total = ids.len();
		let mut outcomes = Vec::with_capacity(batches.len());
		let mut completed = 0;
		let mut failed_batches = 0;

		debug!(
			"Fetching {} {} in {} batches (concurrency {})",
			total,
			label,
			batches.len(),
			self.config.concurrency_size
		);

		for super_batch in batches.chunks(self.config.concurrency_size.max(1)) {
			let runs = super_batch
				.iter()
				.enumerate()
				.map(|(offset, batch)| self.run_batch(label, offset, batch, &fetch_one));
			let results = join_all(runs).await;

			for (batch, result) in super_batch.iter().zip(results) {
				completed += batch.len();
				if result.is_err() {
					failed_batches += 1;
				}
				outcomes.push(BatchOutcome {
					ids: batch.to_vec(),
					result,
				});
			}

			self.dispatcher
				.dispatch(&SyncEvent::BatchProgress {
					label: label.to_string(),
					completed,
					total,
					failed_batches,
				})
				.await;
		}

		BatchFetchOutcome { outcomes }
	}

	async fn run_batch<I, T, F, Fut>(
		&self,
		label: &str,
		offset: usize,
		batch: &[I],
		fetch_one: &F,
	) -> Result<Vec<T>, FetchError>
	where
		I: Clone + Display + Send + Sync,
		F: Fn(I) -> Fut + Send + Sync,
		Fut: Future<Output = Result<Option<T>, LedgerError>>,
	{
		if offset > 0 {
			tokio::time::sleep(self.config.stagger * offset as u32).await;
		}

		let unit = match (batch.first(), batch.last()) {
			(Some(first), Some(last)) => format!("{label} batch [{first}..{last}]"),
			_ => format!("{label} batch"),
		};

		with_retry(self.config.retry, &unit, |_attempt| {
			try_join_all(batch.iter().cloned().map(|id| {
				let call = fetch_one(id.clone());
				async move {
					call.await?
						.ok_or_else(|| LedgerError::NotFound(format!("{label} {id}")))
				}
			}))
		})
		.await
		.map_err(|source| {
			warn!("{} failed: {}", unit, source);
			FetchError {
				unit,
				attempts: self.config.retry.max_attempts.max(1),
				source,
			}
		})
	}

	pub async fn fetch_blocks(
		&self,
		source: &dyn LedgerSource,
		numbers: &[u64],
	) -> BatchFetchOutcome<u64, BlockInfo> {
		self.fetch("blocks", numbers, move |number| {
			source.get_block(BlockTag::Number(number))
		})
		.await
	}

	pub async fn fetch_transactions(
		&self,
		source: &dyn LedgerSource,
		hashes: &[String],
	) -> BatchFetchOutcome<String, TransactionInfo> {
		self.fetch("transactions", hashes, move |hash| async move {
			source.get_transaction(&hash).await
		})
		.await
	}

	pub async fn fetch_receipts(
		&self,
		source: &dyn LedgerSource,
		hashes: &[String],
	) -> BatchFetchOutcome<String, ReceiptInfo> {
		self.fetch("receipts", hashes, move |hash| async move {
			source.get_transaction_receipt(&hash).await
		})
		.await
	}
}
