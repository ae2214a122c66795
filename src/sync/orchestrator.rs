//! Event acquisition pipeline and integration point for all sync services.
//!
//! This module defines the `EventSyncPipeline`, the sole entry point callers use to obtain the
//! latest state of a stream. One `sync` call walks the stages
//! ReadCache → ReadSnapshot (cold cache only) → FetchLive → Merge → Validate → Persist → Done,
//! dispatching a `StageEntered` event as it enters each one.
//!
//! The pipeline is responsible for:
//! - Seeding from the local cache, or from a digest-checked remote snapshot when the cache is cold
//! - Fetching the live delta through the configured live strategy (chain logs or trusted relayer)
//! - Merging prior and new records into chain order without duplicates
//! - Validating every record the cache does not already vouch for, and anchoring deposit streams
//!   against the pool contract's known roots
//! - Persisting the reconciled stream with its height and tree edge
//!
//! Protocol inconsistencies and configuration errors abort the call. Any other failure returns
//! the last known-good state marked stale. Heights returned by one pipeline never go backwards.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::{CachePersistenceService, CachedStream, SnapshotLoader};
use crate::ledger::RootChecker;
use crate::merkle::{Element, MerkleTreeService, TreeEdge, TreeInput};
use crate::sync::events::{EventDispatcher, SyncEvent};
use crate::sync::records::{EventRecord, RecordId, max_block, merge_records};
use crate::sync::strategies::LiveSyncStrategy;
use crate::sync::streams::{StreamKey, StreamKind, StreamTarget};
use crate::sync::types::{
    SyncError, SyncOutcome, SyncStage, ValidationResult, ValidationStatus,
};
use crate::sync::validation::{ValidatorRegistry, check_leaf_indices};

/// The event acquisition pipeline for a set of configured streams.
pub struct EventSyncPipeline {
    targets: HashMap<String, StreamTarget>,

    // Services
    live: Arc<dyn LiveSyncStrategy>,
    root_checker: Arc<dyn RootChecker>,
    cache: CachePersistenceService,
    snapshots: Option<SnapshotLoader>,
    merkle: MerkleTreeService,
    validators: ValidatorRegistry,
    dispatcher: EventDispatcher,

    /// Last state returned per stream, so heights never regress within a session.
    session: Mutex<HashMap<String, CachedStream>>,
}

impl EventSyncPipeline {
    pub fn new(
        live: Arc<dyn LiveSyncStrategy>,
        root_checker: Arc<dyn RootChecker>,
        cache: CachePersistenceService,
        merkle: MerkleTreeService,
        validators: ValidatorRegistry,
        dispatcher: EventDispatcher,
    ) -> Self {
        Self {
            targets: HashMap::new(),
            live,
            root_checker,
            cache,
            snapshots: None,
            merkle,
            validators,
            dispatcher,
            session: Mutex::new(HashMap::new()),
        }
    }

    /// Seed cold caches from the remote snapshot tier.
    pub fn with_snapshots(mut self, loader: SnapshotLoader) -> Self {
        self.snapshots = Some(loader);
        self
    }

    pub fn with_stream(mut self, target: StreamTarget) -> Self {
        self.register_stream(target);
        self
    }

    pub fn register_stream(&mut self, target: StreamTarget) {
        self.targets.insert(target.key.cache_key(), target);
    }

    /// Configured stream keys, sorted.
    pub fn stream_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.targets.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn live_strategy(&self) -> &'static str {
        self.live.name()
    }

    /// Bring `stream_key` up to date and return its records.
    #[tracing::instrument(skip_all, fields(stream = %stream_key))]
    pub async fn sync(&self, stream_key: &str) -> Result<SyncOutcome, SyncError> {
        let result = self.run(stream_key).await;
        if let Err(e) = &result {
            error!("Sync of {} failed: {}", stream_key, e);
            self.dispatcher
                .dispatch(&SyncEvent::SyncError {
                    stream: stream_key.to_string(),
                    error: e.to_string(),
                    fatal: e.is_fatal(),
                })
                .await;
        }
        result
    }

    /// Sync every configured stream in key order.
    pub async fn sync_all(&self) -> Vec<(String, Result<SyncOutcome, SyncError>)> {
        let mut results = Vec::new();
        for key in self.stream_keys() {
            let result = self.sync(&key).await;
            results.push((key, result));
        }
        results
    }

    fn resolve(&self, stream_key: &str) -> Result<&StreamTarget, SyncError> {
        let key = StreamKey::from_str(stream_key).map_err(|e| SyncError::Config(e.to_string()))?;
        let target = self
            .targets
            .get(&key.cache_key())
            .ok_or_else(|| SyncError::Config(format!("stream {key} is not configured")))?;

        if let Some(net_id) = self.live.net_id() {
            if net_id != target.key.net_id {
                return Err(SyncError::Config(format!(
                    "{} serves network {} but stream {} is on network {}",
                    self.live.name(),
                    net_id,
                    key,
                    target.key.net_id
                )));
            }
        }
        Ok(target)
    }

    async fn run(&self, stream_key: &str) -> Result<SyncOutcome, SyncError> {
        let target = self.resolve(stream_key)?;
        let key = target.key.cache_key();
        let kind = target.kind();

        self.enter(&key, SyncStage::ReadCache).await;
        let trusted = self.read_trusted(&key).await;
        let trusted_records: &[EventRecord] = trusted
            .as_ref()
            .map(|t| t.records.as_slice())
            .unwrap_or_default();
        let trusted_height = trusted.as_ref().map_or(0, |t| t.height);

        let mut seed = Vec::new();
        let base_height = match &trusted {
            Some(entry) => entry.height,
            None => {
                let mut height = target.genesis_height();
                if let Some(loader) = &self.snapshots {
                    self.enter(&key, SyncStage::ReadSnapshot).await;
                    match loader.load(&key, target.snapshot_digest.as_deref()).await {
                        // the last block may continue past the export, so it is fetched again
                        Ok(Some(records)) => {
                            if let Some(last) = max_block(&records) {
                                height = height.max(last.saturating_sub(1));
                            }
                            seed = records;
                        }
                        Ok(None) => {}
                        Err(e) => warn!("Snapshot for {} rejected, starting cold: {}", key, e),
                    }
                }
                height
            }
        };

        self.enter(&key, SyncStage::FetchLive).await;
        let from_block = base_height + 1;
        let live = match self.live.fetch(target, from_block).await {
            Ok(live) => live,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.fallback(&key, trusted, e.to_string()).await),
        };

        self.enter(&key, SyncStage::Merge).await;
        let prior: &[EventRecord] = if trusted.is_some() { trusted_records } else { &seed };
        let merged = merge_records(prior, &live.records);
        let trusted_ids: HashSet<RecordId> = trusted_records.iter().map(EventRecord::id).collect();
        let unknown: Vec<EventRecord> = merged
            .iter()
            .filter(|record| !trusted_ids.contains(&record.id()))
            .cloned()
            .collect();
        debug!(
            "Merged {} prior and {} live records of {} into {} ({} unknown)",
            prior.len(),
            live.records.len(),
            key,
            merged.len(),
            unknown.len()
        );

        self.enter(&key, SyncStage::Validate).await;
        self.validators.validate(kind, &key, &unknown)?;

        let mut tree_edge = trusted.as_ref().and_then(|t| t.tree_edge.clone());
        let mut verified_root = None;
        if kind == StreamKind::Deposits {
            check_leaf_indices(&key, &merged)?;
            if !unknown.is_empty() {
                // the pool only remembers recent roots, so a prefix root would be rejected
                if let Some(reason) = &live.shortfall {
                    let reason = format!("deposits past {} not anchored: {}", trusted_height, reason);
                    return Ok(self.fallback(&key, trusted, reason).await);
                }
                let anchored = self
                    .anchor(
                        target,
                        &merged,
                        trusted_records.len(),
                        tree_edge.as_ref(),
                        &unknown,
                    )
                    .await;
                match anchored {
                    Ok((root, edge)) => {
                        verified_root = Some(root);
                        tree_edge = edge;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => return Ok(self.fallback(&key, trusted, e.to_string()).await),
                }
            }
        }

        self.enter(&key, SyncStage::Persist).await;
        let height = live.covered_height.max(base_height);
        if !unknown.is_empty() || height > trusted_height {
            let entry = CachedStream::new(merged.clone(), height, tree_edge);
            self.cache.save(&key, &entry).await;
            self.session.lock().insert(key.clone(), entry);
        } else {
            debug!("Nothing new for {}, cache left as is", key);
        }

        let mut validation = ValidationResult::valid(unknown.len(), verified_root);
        if let Some(reason) = live.shortfall {
            warn!("{} synced to {} with gaps ahead: {}", key, height, reason);
            validation.status = ValidationStatus::Stale { reason };
        }

        info!(
            "Synced {}: {} records ({} new) at height {}",
            key,
            merged.len(),
            unknown.len(),
            height
        );
        Ok(self.complete(&key, merged, height, unknown.len(), validation).await)
    }

    /// Prefer whichever of the cache and this session's last result is further along.
    async fn read_trusted(&self, key: &str) -> Option<CachedStream> {
        let cached = self.cache.load(key).await.filter(|entry| entry.height > 0);
        let remembered = self.session.lock().get(key).cloned();
        match (cached, remembered) {
            (Some(cached), Some(remembered)) if remembered.height > cached.height => {
                warn!(
                    "Cache for {} is at {} behind this session's {}, using the session state",
                    key, cached.height, remembered.height
                );
                Some(remembered)
            }
            (Some(cached), _) => Some(cached),
            (None, remembered) => remembered,
        }
    }

    /// Build the commitment tree over `merged` and check its root against the pool.
    ///
    /// When the cached edge sits on the last trusted leaf only the unknown suffix is hashed.
    async fn anchor(
        &self,
        target: &StreamTarget,
        merged: &[EventRecord],
        trusted_count: usize,
        edge: Option<&TreeEdge>,
        unknown: &[EventRecord],
    ) -> Result<(Element, Option<TreeEdge>), SyncError> {
        let stream = target.key.to_string();
        let leaves = merged
            .iter()
            .map(|record| {
                Element::from_hex(record.commitment().unwrap_or_default()).map_err(|e| {
                    SyncError::InvalidRecord {
                        stream: stream.clone(),
                        block_number: record.block_number,
                        transaction_hash: record.transaction_hash.clone(),
                        reason: format!("bad commitment: {e}"),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let input = match edge {
            Some(edge)
                if edge.edge_index + 1 == trusted_count
                    && edge.edge_path.len() == self.merkle.levels()
                    && leaves.get(edge.edge_index) == Some(&edge.edge_element) =>
            {
                debug!(
                    "Hashing {} new leaves of {} from cached edge {}",
                    leaves.len() - trusted_count,
                    stream,
                    edge.edge_index
                );
                TreeInput::Partial {
                    edge: edge.clone(),
                    leaves: leaves[edge.edge_index..].to_vec(),
                }
            }
            Some(edge) => {
                debug!(
                    "Cached edge {} of {} does not fit a {}-level tree over {} trusted leaves, rebuilding",
                    edge.edge_index,
                    stream,
                    self.merkle.levels(),
                    trusted_count
                );
                TreeInput::Full(leaves)
            }
            None => TreeInput::Full(leaves),
        };

        let tree = self.merkle.build_tree(input).await?;
        let root = tree.root();
        if !self
            .merkle
            .verify(&tree, self.root_checker.as_ref(), &target.address)
            .await?
        {
            return Err(SyncError::MerkleRootMismatch {
                stream,
                contract: target.address.clone(),
                root,
                leaf_count: tree.len(),
                from_block: unknown.first().map_or(0, |r| r.block_number),
                to_block: unknown.last().map_or(0, |r| r.block_number),
            });
        }

        info!("Root {} of {} leaves accepted for {}", root, tree.len(), stream);
        Ok((root, tree.last_edge()))
    }

    /// Return the last known-good state, marked stale.
    async fn fallback(
        &self,
        key: &str,
        trusted: Option<CachedStream>,
        reason: String,
    ) -> SyncOutcome {
        warn!("Sync of {} fell back to its last known-good state: {}", key, reason);
        self.dispatcher
            .dispatch(&SyncEvent::SyncError {
                stream: key.to_string(),
                error: reason.clone(),
                fatal: false,
            })
            .await;

        let (records, height) = trusted
            .map(|entry| (entry.records, entry.height))
            .unwrap_or_default();
        self.complete(key, records, height, 0, ValidationResult::stale(reason))
            .await
    }

    async fn complete(
        &self,
        key: &str,
        records: Vec<EventRecord>,
        height: u64,
        new_records: usize,
        validation: ValidationResult,
    ) -> SyncOutcome {
        self.dispatcher
            .dispatch(&SyncEvent::SyncCompleted {
                stream: key.to_string(),
                records: records.len(),
                new_records,
                height,
                status: validation.status.clone(),
            })
            .await;
        self.enter(key, SyncStage::Done).await;

        SyncOutcome {
            stream: key.to_string(),
            records,
            height,
            validation,
        }
    }

    async fn enter(&self, key: &str, stage: SyncStage) {
        self.dispatcher
            .dispatch(&SyncEvent::StageEntered {
                stream: key.to_string(),
                stage,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryStreamCacheRepository, StreamCacheRepository};
    use crate::ledger::LedgerError;
    use crate::merkle::{DEFAULT_ZERO_ELEMENT, Keccak256Hasher};
    use crate::relayer::RelayerError;
    use crate::sync::events::SyncEventHandler;
    use crate::sync::records::fixtures::{deposit, withdrawal};
    use crate::sync::strategies::LiveBatch;
    use std::collections::VecDeque;

    const KEY: &str = "withdrawals_1_eth_0.1";

    /// Hands out scripted live results in order.
    struct ScriptedLive {
        results: Mutex<VecDeque<Result<LiveBatch, SyncError>>>,
        net_id: Option<u64>,
        calls: Mutex<Vec<u64>>,
    }

    impl ScriptedLive {
        fn new(results: Vec<Result<LiveBatch, SyncError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                net_id: None,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl LiveSyncStrategy for ScriptedLive {
        async fn fetch(&self, _target: &StreamTarget, from_block: u64) -> Result<LiveBatch, SyncError> {
            self.calls.lock().push(from_block);
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(LiveBatch::default()))
        }

        fn net_id(&self) -> Option<u64> {
            self.net_id
        }

        fn name(&self) -> &'static str {
            "ScriptedLive"
        }
    }

    struct AcceptAll;

    #[async_trait::async_trait]
    impl RootChecker for AcceptAll {
        async fn is_known_root(&self, _contract: &str, _root: &Element) -> Result<bool, LedgerError> {
            Ok(true)
        }
    }

    #[derive(Default)]
    struct StageRecorder {
        stages: Mutex<Vec<SyncStage>>,
    }

    #[async_trait::async_trait]
    impl SyncEventHandler for StageRecorder {
        async fn handle(&self, event: &SyncEvent) -> Result<(), SyncError> {
            if let SyncEvent::StageEntered { stage, .. } = event {
                self.stages.lock().push(*stage);
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "StageRecorder"
        }
    }

    fn test_pipeline(
        live: Arc<ScriptedLive>,
        cache: CachePersistenceService,
        dispatcher: EventDispatcher,
    ) -> EventSyncPipeline {
        let merkle = MerkleTreeService::new(
            Arc::new(Keccak256Hasher),
            20,
            Element::from_hex(DEFAULT_ZERO_ELEMENT).unwrap(),
            false,
        );
        EventSyncPipeline::new(
            live,
            Arc::new(AcceptAll),
            cache,
            merkle,
            ValidatorRegistry::standard(),
            dispatcher,
        )
        .with_stream(StreamTarget::new(
            KEY.parse().unwrap(),
            "0x00000000000000000000000000000000000000aa",
            100,
        ))
    }

    fn batch(records: Vec<EventRecord>, covered_height: u64) -> Result<LiveBatch, SyncError> {
        Ok(LiveBatch {
            records,
            covered_height,
            shortfall: None,
        })
    }

    #[tokio::test]
    async fn visits_every_stage_in_order() {
        let recorder = Arc::new(StageRecorder::default());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(recorder.clone());
        let live = ScriptedLive::new(vec![batch(vec![withdrawal(120, 0)], 150)]);
        let pipeline = test_pipeline(live.clone(), CachePersistenceService::unavailable(), dispatcher);

        let outcome = pipeline.sync(KEY).await.unwrap();
        assert_eq!(outcome.height, 150);
        assert!(outcome.validation.is_valid());
        assert_eq!(*live.calls.lock(), vec![100]);
        // no snapshot loader, so ReadSnapshot is skipped
        assert_eq!(
            *recorder.stages.lock(),
            vec![
                SyncStage::ReadCache,
                SyncStage::FetchLive,
                SyncStage::Merge,
                SyncStage::Validate,
                SyncStage::Persist,
                SyncStage::Done,
            ]
        );
    }

    #[tokio::test]
    async fn transient_failure_returns_stale_prior_state() {
        let repo = Arc::new(InMemoryStreamCacheRepository::new());
        repo.save(KEY, &CachedStream::new(vec![withdrawal(110, 0)], 110, None))
            .await
            .unwrap();
        let live = ScriptedLive::new(vec![Err(SyncError::Relayer(RelayerError::InvalidPage(
            "down".into(),
        )))]);
        let pipeline = test_pipeline(
            live,
            CachePersistenceService::new(repo.clone()),
            EventDispatcher::new(),
        );

        let outcome = pipeline.sync(KEY).await.unwrap();
        assert_eq!(outcome.height, 110);
        assert_eq!(outcome.records, vec![withdrawal(110, 0)]);
        assert!(!outcome.validation.is_valid());
        assert_eq!(repo.load(KEY).await.unwrap().unwrap().height, 110);
    }

    #[tokio::test]
    async fn height_never_regresses_without_a_cache() {
        let live = ScriptedLive::new(vec![
            batch(vec![withdrawal(120, 0)], 150),
            Err(SyncError::Relayer(RelayerError::InvalidPage("down".into()))),
            batch(Vec::new(), 170),
        ]);
        let pipeline = test_pipeline(
            live.clone(),
            CachePersistenceService::unavailable(),
            EventDispatcher::new(),
        );

        assert_eq!(pipeline.sync(KEY).await.unwrap().height, 150);
        let stale = pipeline.sync(KEY).await.unwrap();
        assert_eq!(stale.height, 150);
        assert_eq!(stale.records.len(), 1);
        let resumed = pipeline.sync(KEY).await.unwrap();
        assert_eq!(resumed.height, 170);
        assert_eq!(resumed.records.len(), 1);
        // the session state seeds later calls even though nothing was persisted
        assert_eq!(*live.calls.lock(), vec![100, 151, 151]);
    }

    #[tokio::test]
    async fn configuration_errors_abort_before_fetching() {
        let live = ScriptedLive::new(Vec::new());
        let pipeline = test_pipeline(
            live.clone(),
            CachePersistenceService::unavailable(),
            EventDispatcher::new(),
        );
        assert!(matches!(
            pipeline.sync("withdrawals_1_eth_1").await,
            Err(SyncError::Config(_))
        ));
        assert!(matches!(pipeline.sync("nonsense").await, Err(SyncError::Config(_))));

        let mismatched = Arc::new(ScriptedLive {
            results: Mutex::new(VecDeque::new()),
            net_id: Some(5),
            calls: Mutex::new(Vec::new()),
        });
        let pipeline = test_pipeline(
            mismatched.clone(),
            CachePersistenceService::unavailable(),
            EventDispatcher::new(),
        );
        assert!(matches!(pipeline.sync(KEY).await, Err(SyncError::Config(_))));
        assert!(mismatched.calls.lock().is_empty());
        assert!(live.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn malformed_live_record_is_fatal() {
        let mut bad = withdrawal(120, 0);
        bad.transaction_hash = "not-a-hash".into();
        let live = ScriptedLive::new(vec![batch(vec![bad], 150)]);
        let pipeline = test_pipeline(live, CachePersistenceService::unavailable(), EventDispatcher::new());
        let err = pipeline.sync(KEY).await.unwrap_err();
        assert!(err.is_protocol_inconsistency());
    }

    #[tokio::test]
    async fn deposit_edge_is_persisted() {
        let repo = Arc::new(InMemoryStreamCacheRepository::new());
        let live = ScriptedLive::new(vec![batch(
            vec![deposit(100, 0, 0), deposit(105, 0, 1)],
            110,
        )]);
        let pipeline = test_pipeline(live, CachePersistenceService::new(repo.clone()), EventDispatcher::new())
            .with_stream(StreamTarget::new(
                "deposits_1_eth_0.1".parse().unwrap(),
                "0x00000000000000000000000000000000000000aa",
                100,
            ));

        let outcome = pipeline.sync("deposits_1_eth_0.1").await.unwrap();
        assert!(outcome.validation.verified_root.is_some());
        let cached = repo.load("deposits_1_eth_0.1").await.unwrap().unwrap();
        let edge = cached.tree_edge.unwrap();
        assert_eq!(edge.edge_index, 1);
        assert_eq!(edge.edge_elements_count, 2);
    }

    #[tokio::test]
    async fn deposits_behind_a_gap_are_not_anchored() {
        const DEPOSITS: &str = "deposits_1_eth_0.1";
        let repo = Arc::new(InMemoryStreamCacheRepository::new());
        repo.save(DEPOSITS, &CachedStream::new(vec![deposit(100, 0, 0)], 110, None))
            .await
            .unwrap();
        let live = ScriptedLive::new(vec![Ok(LiveBatch {
            records: vec![deposit(120, 0, 1)],
            covered_height: 130,
            shortfall: Some("logs 131..=180 failed".into()),
        })]);
        let pipeline = test_pipeline(live, CachePersistenceService::new(repo.clone()), EventDispatcher::new())
            .with_stream(StreamTarget::new(
                DEPOSITS.parse().unwrap(),
                "0x00000000000000000000000000000000000000aa",
                100,
            ));

        let outcome = pipeline.sync(DEPOSITS).await.unwrap();
        assert!(matches!(outcome.validation.status, ValidationStatus::Stale { .. }));
        assert_eq!(outcome.height, 110);
        assert_eq!(outcome.records, vec![deposit(100, 0, 0)]);
        let cached = repo.load(DEPOSITS).await.unwrap().unwrap();
        assert_eq!(cached.height, 110);
        assert_eq!(cached.records.len(), 1);
    }

    #[tokio::test]
    async fn edge_of_another_depth_is_rebuilt_in_full() {
        const DEPOSITS: &str = "deposits_1_eth_0.1";
        let trusted = vec![deposit(100, 0, 0), deposit(105, 0, 1)];
        let shallow = MerkleTreeService::new(
            Arc::new(Keccak256Hasher),
            10,
            Element::from_hex(DEFAULT_ZERO_ELEMENT).unwrap(),
            false,
        );
        let leaves = trusted
            .iter()
            .map(|r| Element::from_hex(r.commitment().unwrap()).unwrap())
            .collect();
        let edge = shallow
            .compute_inline(&TreeInput::Full(leaves))
            .unwrap()
            .last_edge()
            .unwrap();
        assert_eq!(edge.edge_path.len(), 10);

        let repo = Arc::new(InMemoryStreamCacheRepository::new());
        repo.save(DEPOSITS, &CachedStream::new(trusted, 110, Some(edge)))
            .await
            .unwrap();
        let live = ScriptedLive::new(vec![batch(vec![deposit(120, 0, 2)], 130)]);
        let pipeline = test_pipeline(live, CachePersistenceService::new(repo.clone()), EventDispatcher::new())
            .with_stream(StreamTarget::new(
                DEPOSITS.parse().unwrap(),
                "0x00000000000000000000000000000000000000aa",
                100,
            ));

        let outcome = pipeline.sync(DEPOSITS).await.unwrap();
        assert!(outcome.validation.is_valid());
        assert_eq!(outcome.records.len(), 3);
        let cached = repo.load(DEPOSITS).await.unwrap().unwrap();
        let edge = cached.tree_edge.unwrap();
        assert_eq!(edge.edge_index, 2);
        assert_eq!(edge.edge_path.len(), 20);
    }
}
