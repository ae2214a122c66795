use std::env;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

use pool_state_sync::cache::{CachePersistenceService, SnapshotLoader};
use pool_state_sync::config::SyncConfig;
use pool_state_sync::fetch::{BatchFetcher, LogBatchFetcher};
use pool_state_sync::ledger::JsonRpcLedgerClient;
use pool_state_sync::merkle::{Keccak256Hasher, MerkleTreeService};
use pool_state_sync::relayer::{HttpRelayerApi, RelayerEventClient};
use pool_state_sync::sync::events::{EventDispatcher, LoggingEventHandler};
use pool_state_sync::sync::progress_tracker::SyncProgressTracker;
use pool_state_sync::sync::strategies::{ChainLogSync, LiveSyncStrategy, RelayerSync};
use pool_state_sync::sync::validation::ValidatorRegistry;
use pool_state_sync::sync::{EventSyncPipeline, ValidationStatus};

const CONFIG_ENV: &str = "POOL_SYNC_CONFIG";

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive("reqwest=warn".parse().unwrap())
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config_path = env::var(CONFIG_ENV).unwrap_or_else(|_| "pool-sync.toml".to_string());
	let config = match SyncConfig::load(&config_path) {
		Ok(config) => config,
		Err(e) => {
			error!("Failed to load {}: {}", config_path, e);
			process::exit(1);
		}
	};
	info!(
		"Starting pool state sync on network {} with {} streams",
		config.net_id,
		config.streams.len()
	);

	let ledger = match JsonRpcLedgerClient::new(config.rpc_url.clone(), config.request_timeout()) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			error!("Failed to create ledger client: {}", e);
			process::exit(1);
		}
	};

	let tracker = Arc::new(SyncProgressTracker::new());
	let mut dispatcher = EventDispatcher::new();
	dispatcher.register_handler(Arc::new(LoggingEventHandler));
	dispatcher.register_handler(tracker.clone());

	let live: Arc<dyn LiveSyncStrategy> = match config.active_relayer() {
		Some(relayer) => {
			let api = match HttpRelayerApi::new(&relayer.url, config.request_timeout()) {
				Ok(api) => api,
				Err(e) => {
					error!("Failed to create relayer client: {}", e);
					process::exit(1);
				}
			};
			info!("Live events from relayer {}", relayer.url);
			Arc::new(RelayerSync::new(
				RelayerEventClient::new(Arc::new(api), relayer.page_limit)
					.with_retry(relayer.retry()),
				relayer.net_id,
			))
		}
		None => {
			info!("Live events from ledger {}", config.rpc_url);
			Arc::new(ChainLogSync::new(
				ledger.clone(),
				LogBatchFetcher::new(config.logs_config(), dispatcher.clone()),
				BatchFetcher::new(config.batch_config(), dispatcher.clone()),
			))
		}
	};

	let zero_element = match config.zero_element() {
		Ok(element) => element,
		Err(e) => {
			error!("{}", e);
			process::exit(1);
		}
	};
	let merkle = MerkleTreeService::new(
		Arc::new(Keccak256Hasher),
		config.tree_levels,
		zero_element,
		config.off_thread_tree,
	)
	.with_retry(config.batch_config().retry);

	let cache = CachePersistenceService::open(config.data_dir.clone()).await;

	let mut pipeline = EventSyncPipeline::new(
		live,
		ledger,
		cache,
		merkle,
		ValidatorRegistry::standard(),
		dispatcher,
	);

	if let Some(static_base) = &config.static_base {
		match SnapshotLoader::new(static_base.as_str(), config.request_timeout()) {
			Ok(loader) => pipeline = pipeline.with_snapshots(loader),
			Err(e) => warn!("Snapshot tier disabled: {}", e),
		}
	}

	let targets = match config.stream_targets() {
		Ok(targets) => targets,
		Err(e) => {
			error!("{}", e);
			process::exit(1);
		}
	};
	for target in targets {
		pipeline.register_stream(target);
	}

	let mut failed = false;
	for (stream, result) in pipeline.sync_all().await {
		match result {
			Ok(outcome) => match &outcome.validation.status {
				ValidationStatus::Valid => info!(
					"{}: {} records up to block {}",
					stream,
					outcome.records.len(),
					outcome.height
				),
				ValidationStatus::Stale { reason } => warn!(
					"{}: {} records up to block {} (stale: {})",
					stream,
					outcome.records.len(),
					outcome.height,
					reason
				),
			},
			Err(e) => {
				error!("{}: {}", stream, e);
				failed |= e.is_fatal();
			}
		}
	}

	tracker.log_summary();

	if failed {
		process::exit(1);
	}
}
