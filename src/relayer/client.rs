//!
//! HTTP client for a trusted relayer's event export.
//!
//! The relayer answers `POST {base}/events` with at most a page-limit worth of records. A block's
//! records can straddle two pages, so a full page is cut at its last block and that block is
//! requested again as the start of the next page.

use super::types::*;
use crate::fetch::{RetryPolicy, with_retry};
use crate::sync::records::EventRecord;
use crate::sync::streams::StreamKind;

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Raw access to the relayer events endpoint
#[async_trait::async_trait]
pub trait RelayerApi: Send + Sync {
	async fn events(&self, request: &EventsRequest) -> Result<EventsPage, RelayerError>;
}

/// Relayer events endpoint over HTTP
#[derive(Clone)]
pub struct HttpRelayerApi {
	/// The underlying HTTP client.
	http_client: Client,
	/// Relayer base URL, without the trailing slash.
	base_url: String,
}

impl HttpRelayerApi {
	pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayerError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			base_url: base_url.trim_end_matches('/').to_string(),
		})
	}
}

#[async_trait::async_trait]
impl RelayerApi for HttpRelayerApi {
	async fn events(&self, request: &EventsRequest) -> Result<EventsPage, RelayerError> {
		let url = format!("{}/events", self.base_url);
		debug!("Requesting relayer events: {:?}", request);

		let response = self.http_client.post(&url).json(request).send().await?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(RelayerError::Status {
				status: status.as_u16(),
				body,
			});
		}

		Ok(response.json::<EventsPage>().await?)
	}
}

/// Paginating reader over a [`RelayerApi`]
#[derive(Clone)]
pub struct RelayerEventClient {
	api: Arc<dyn RelayerApi>,
	page_limit: usize,
	retry: RetryPolicy,
}

impl RelayerEventClient {
	pub fn new(api: Arc<dyn RelayerApi>, page_limit: usize) -> Self {
		Self {
			api,
			page_limit: page_limit.max(1),
			retry: RetryPolicy::new(5, Duration::from_millis(500)),
		}
	}

	/// Retry each page request with `retry` instead of the default policy.
	pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	/// Fetch every record from `request.from_block` on, following pages until a short one.
	pub async fn fetch_events(&self, request: EventsRequest) -> Result<RelayerEvents, RelayerError> {
		let mut request = request;
		let mut records: Vec<EventRecord> = Vec::new();
		let mut pages = 0;

		loop {
			let label = format!("relayer {} from {}", request.event_type, request.from_block);
			let page = with_retry(self.retry, &label, |_attempt| self.api.events(&request)).await?;
			pages += 1;

			if page.events.len() < self.page_limit {
				debug!(
					"Relayer page {} from block {} is final with {} records",
					pages,
					request.from_block,
					page.events.len()
				);
				records.extend(page.events);
				info!(
					"Fetched {} {} records from relayer in {} pages (relayer at block {})",
					records.len(),
					request.event_type,
					pages,
					page.last_sync_block
				);
				return Ok(RelayerEvents {
					records,
					last_sync_block: page.last_sync_block,
					pages,
				});
			}

			let mut events = page.events;
			events.sort_by(|a, b| a.chain_order(b));
			let Some(boundary) = events.last().map(|record| record.block_number) else {
				return Err(RelayerError::InvalidPage("empty page at the page limit".into()));
			};

			if boundary <= request.from_block {
				return Err(RelayerError::InvalidPage(format!(
					"full page of {} records does not advance past block {}",
					events.len(),
					request.from_block
				)));
			}

			// the boundary block may continue on the next page, so it is requested again whole
			events.retain(|record| record.block_number < boundary);
			debug!(
				"Relayer page {} cut at block {}, keeping {} records",
				pages,
				boundary,
				events.len()
			);
			records.extend(events);
			request.from_block = boundary;
		}
	}
}

/// Request for one stream, scoped by pool when the stream is a pool stream.
pub fn events_request(
	kind: StreamKind,
	pool: Option<(&str, &str)>,
	from_block: u64,
) -> EventsRequest {
	let (currency, amount) = pool
		.map(|(currency, amount)| (Some(currency.to_string()), Some(amount.to_string())))
		.unwrap_or_default();
	EventsRequest {
		event_type: relayer_event_type(kind).to_string(),
		currency,
		amount,
		from_block,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sync::records::fixtures::deposit;
	use itertools::Itertools;
	use parking_lot::Mutex;

	/// Serves `records` from `from_block` on, `limit` at a time.
	struct PagedRelayer {
		records: Vec<EventRecord>,
		limit: usize,
		last_sync_block: u64,
		requests: Mutex<Vec<u64>>,
	}

	#[async_trait::async_trait]
	impl RelayerApi for PagedRelayer {
		async fn events(&self, request: &EventsRequest) -> Result<EventsPage, RelayerError> {
			self.requests.lock().push(request.from_block);
			let events = self
				.records
				.iter()
				.filter(|r| r.block_number >= request.from_block)
				.take(self.limit)
				.cloned()
				.collect();
			Ok(EventsPage {
				events,
				last_sync_block: self.last_sync_block,
			})
		}
	}

	fn relayer(records: Vec<EventRecord>, limit: usize) -> Arc<PagedRelayer> {
		Arc::new(PagedRelayer {
			records,
			limit,
			last_sync_block: 500,
			requests: Mutex::new(Vec::new()),
		})
	}

	#[tokio::test]
	async fn stitches_block_split_across_pages() {
		// block 103 holds three records; the first page ends in the middle of it
		let records = vec![
			deposit(100, 0, 0),
			deposit(101, 0, 1),
			deposit(103, 0, 2),
			deposit(103, 1, 3),
			deposit(103, 2, 4),
			deposit(110, 0, 5),
		];
		let api = relayer(records.clone(), 4);
		let client = RelayerEventClient::new(api.clone(), 4);

		let fetched = client
			.fetch_events(events_request(StreamKind::Deposits, Some(("eth", "0.1")), 100))
			.await
			.unwrap();

		assert_eq!(fetched.records, records);
		assert_eq!(fetched.last_sync_block, 500);
		assert_eq!(fetched.pages, 3);
		assert_eq!(*api.requests.lock(), vec![100, 103, 110]);
		assert!(fetched.records.iter().map(|r| r.id()).all_unique());
	}

	#[tokio::test]
	async fn full_page_inside_one_block_is_invalid() {
		let records = vec![deposit(100, 0, 0), deposit(100, 1, 1), deposit(100, 2, 2)];
		let client = RelayerEventClient::new(relayer(records, 2), 2);
		let err = client
			.fetch_events(events_request(StreamKind::Deposits, Some(("eth", "0.1")), 100))
			.await
			.unwrap_err();
		assert!(matches!(err, RelayerError::InvalidPage(_)));
	}

	/// Fails the first `failures` requests, then serves every record at once.
	struct FlakyRelayer {
		records: Vec<EventRecord>,
		failures: usize,
		requests: Mutex<usize>,
	}

	#[async_trait::async_trait]
	impl RelayerApi for FlakyRelayer {
		async fn events(&self, _request: &EventsRequest) -> Result<EventsPage, RelayerError> {
			let mut requests = self.requests.lock();
			*requests += 1;
			if *requests <= self.failures {
				return Err(RelayerError::Status {
					status: 503,
					body: "busy".into(),
				});
			}
			Ok(EventsPage {
				events: self.records.clone(),
				last_sync_block: 200,
			})
		}
	}

	#[tokio::test]
	async fn transient_page_failures_are_retried() {
		let records = vec![deposit(100, 0, 0), deposit(101, 0, 1)];
		let api = Arc::new(FlakyRelayer {
			records: records.clone(),
			failures: 2,
			requests: Mutex::new(0),
		});
		let client = RelayerEventClient::new(api.clone(), 10)
			.with_retry(RetryPolicy::new(3, Duration::from_millis(1)));

		let fetched = client
			.fetch_events(events_request(StreamKind::Deposits, Some(("eth", "0.1")), 100))
			.await
			.unwrap();
		assert_eq!(fetched.records, records);
		assert_eq!(fetched.pages, 1);
		assert_eq!(*api.requests.lock(), 3);

		let api = Arc::new(FlakyRelayer {
			records,
			failures: 5,
			requests: Mutex::new(0),
		});
		let client = RelayerEventClient::new(api.clone(), 10)
			.with_retry(RetryPolicy::new(2, Duration::from_millis(1)));
		let err = client
			.fetch_events(events_request(StreamKind::Deposits, Some(("eth", "0.1")), 100))
			.await
			.unwrap_err();
		assert!(matches!(err, RelayerError::Status { status: 503, .. }));
		assert_eq!(*api.requests.lock(), 2);
	}

	#[tokio::test]
	async fn short_first_page_is_returned_as_is() {
		let records = vec![deposit(100, 0, 0)];
		let api = relayer(records.clone(), 10);
		let client = RelayerEventClient::new(api.clone(), 10);
		let fetched = client
			.fetch_events(events_request(StreamKind::Deposits, Some(("eth", "0.1")), 0))
			.await
			.unwrap();
		assert_eq!(fetched.records, records);
		assert_eq!(api.requests.lock().len(), 1);
	}
}
