//! Merkle tree construction and root verification for deposit streams.
//!
//! This module provides the `MerkleTreeService`, which rebuilds the commitment tree (full, or
//! partial from a persisted edge) and checks the resulting root against the pool contract.
//! Construction can run on the blocking thread pool so a large rebuild does not stall the async
//! runtime; if the worker dies the service rebuilds inline from the same inputs, so both paths
//! always agree on the root.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::hasher::{Element, TreeHasher};
use super::tree::{MerkleTree, PartialMerkleTree, TreeEdge, TreeError};
use crate::fetch::{RetryPolicy, with_retry};
use crate::ledger::{LedgerError, RootChecker};

/// What to build: every leaf from index 0, or the leaves from a known edge onward.
#[derive(Debug, Clone)]
pub enum TreeInput {
    Full(Vec<Element>),
    Partial { edge: TreeEdge, leaves: Vec<Element> },
}

impl TreeInput {
    pub fn leaf_count(&self) -> usize {
        match self {
            TreeInput::Full(leaves) => leaves.len(),
            TreeInput::Partial { edge, leaves } => edge.edge_index + leaves.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BuiltTree {
    Full(MerkleTree),
    Partial(PartialMerkleTree),
}

impl BuiltTree {
    pub fn root(&self) -> Element {
        match self {
            BuiltTree::Full(tree) => tree.root(),
            BuiltTree::Partial(tree) => tree.root(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BuiltTree::Full(tree) => tree.len(),
            BuiltTree::Partial(tree) => tree.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Edge at the last leaf, for persisting alongside the records.
    pub fn last_edge(&self) -> Option<TreeEdge> {
        let last = self.len().checked_sub(1)?;
        match self {
            BuiltTree::Full(tree) => tree.edge(last).ok(),
            BuiltTree::Partial(tree) => tree.edge(last).ok(),
        }
    }
}

#[derive(Clone)]
/// Service for building commitment trees and anchoring them against the ledger.
pub struct MerkleTreeService {
    hasher: Arc<dyn TreeHasher>,
    levels: usize,
    zero_element: Element,
    off_thread: bool,
    retry: RetryPolicy,
}

impl std::fmt::Debug for MerkleTreeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleTreeService")
            .field("hasher", &self.hasher)
            .field("levels", &self.levels)
            .field("zero_element", &self.zero_element)
            .field("off_thread", &self.off_thread)
            .field("retry", &self.retry)
            .finish()
    }
}

impl MerkleTreeService {
    /// Create a new service for trees of `levels` depth.
    pub fn new(
        hasher: Arc<dyn TreeHasher>,
        levels: usize,
        zero_element: Element,
        off_thread: bool,
    ) -> Self {
        Self {
            hasher,
            levels,
            zero_element,
            off_thread,
            retry: RetryPolicy::new(5, Duration::from_millis(500)),
        }
    }

    /// Retry root lookups with `retry` instead of the default policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn zero_element(&self) -> Element {
        self.zero_element
    }

    /// Build on the calling thread.
    pub fn compute_inline(&self, input: &TreeInput) -> Result<BuiltTree, TreeError> {
        build(input, self.levels, self.zero_element, &self.hasher)
    }

    /// Build on the blocking pool. A panicked or cancelled worker maps to [`TreeError::Worker`].
    pub async fn compute_off_thread(&self, input: Arc<TreeInput>) -> Result<BuiltTree, TreeError> {
        let levels = self.levels;
        let zero_element = self.zero_element;
        let hasher = Arc::clone(&self.hasher);

        tokio::task::spawn_blocking(move || build(&input, levels, zero_element, &hasher))
            .await
            .map_err(|e| TreeError::Worker(e.to_string()))?
    }

    /// Build with the configured strategy, falling back to inline when the worker fails.
    pub async fn build_tree(&self, input: TreeInput) -> Result<BuiltTree, TreeError> {
        if !self.off_thread {
            return self.compute_inline(&input);
        }

        let input = Arc::new(input);
        match self.compute_off_thread(Arc::clone(&input)).await {
            Err(TreeError::Worker(reason)) => {
                warn!(%reason, "Off-thread tree build failed, rebuilding inline");
                self.compute_inline(&input)
            }
            other => other,
        }
    }

    /// Ask the pool contract whether the tree's root is currently known.
    pub async fn verify(
        &self,
        tree: &BuiltTree,
        checker: &dyn RootChecker,
        contract: &str,
    ) -> Result<bool, LedgerError> {
        let root = tree.root();
        let label = format!("isKnownRoot {root}");
        let known = with_retry(self.retry, &label, |_attempt| {
            checker.is_known_root(contract, &root)
        })
        .await?;
        debug!(
            contract,
            root = %root,
            leaves = tree.len(),
            known,
            "Checked tree root against ledger"
        );
        Ok(known)
    }
}

fn build(
    input: &TreeInput,
    levels: usize,
    zero_element: Element,
    hasher: &Arc<dyn TreeHasher>,
) -> Result<BuiltTree, TreeError> {
    match input {
        TreeInput::Full(leaves) => {
            MerkleTree::build(leaves.clone(), levels, zero_element, Arc::clone(hasher))
                .map(BuiltTree::Full)
        }
        TreeInput::Partial { edge, leaves } => PartialMerkleTree::build(
            edge.clone(),
            leaves.clone(),
            levels,
            zero_element,
            Arc::clone(hasher),
        )
        .map(BuiltTree::Partial),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::hasher::Sha256Hasher;
    use async_trait::async_trait;

    fn leaves(n: u8) -> Vec<Element> {
        (1..=n).map(|i| Element([i; 32])).collect()
    }

    fn service(off_thread: bool) -> MerkleTreeService {
        MerkleTreeService::new(Arc::new(Sha256Hasher), 10, Element::default(), off_thread)
    }

    /// Panics on blocking-pool threads so the worker path always fails.
    #[derive(Debug)]
    struct WorkerHostileHasher;

    impl TreeHasher for WorkerHostileHasher {
        fn hash_pair(&self, left: &Element, right: &Element) -> Element {
            let name = std::thread::current().name().map(str::to_string);
            if name.as_deref() == Some("tokio-runtime-worker") {
                panic!("hasher unavailable on worker threads");
            }
            Sha256Hasher.hash_pair(left, right)
        }
    }

    struct FixedRoots(Vec<Element>);

    #[async_trait]
    impl RootChecker for FixedRoots {
        async fn is_known_root(&self, _contract: &str, root: &Element) -> Result<bool, LedgerError> {
            Ok(self.0.contains(root))
        }
    }

    #[tokio::test]
    async fn inline_and_worker_roots_agree() {
        let svc = service(true);
        let input = TreeInput::Full(leaves(37));
        let inline = svc.compute_inline(&input).unwrap();
        let worker = svc.compute_off_thread(Arc::new(input)).await.unwrap();
        assert_eq!(inline.root(), worker.root());
        assert_eq!(worker.len(), 37);
    }

    #[tokio::test]
    async fn worker_failure_falls_back_to_inline() {
        let hostile =
            MerkleTreeService::new(Arc::new(WorkerHostileHasher), 10, Element::default(), true);
        let input = TreeInput::Full(leaves(9));

        let direct = hostile.compute_off_thread(Arc::new(input.clone())).await;
        assert!(matches!(direct, Err(TreeError::Worker(_))));

        let built = hostile.build_tree(input.clone()).await.unwrap();
        let expected = service(false).compute_inline(&input).unwrap();
        assert_eq!(built.root(), expected.root());
    }

    #[tokio::test]
    async fn partial_input_matches_full_root() {
        let svc = service(false);
        let all = leaves(12);
        let prefix = svc.compute_inline(&TreeInput::Full(all[..5].to_vec())).unwrap();
        let edge = prefix.last_edge().unwrap();
        assert_eq!(edge.edge_index, 4);

        let partial = svc
            .build_tree(TreeInput::Partial {
                edge,
                leaves: all[4..].to_vec(),
            })
            .await
            .unwrap();
        let full = svc.build_tree(TreeInput::Full(all)).await.unwrap();
        assert_eq!(partial.root(), full.root());
        assert_eq!(partial.len(), 12);
        assert_eq!(partial.last_edge(), full.last_edge());
    }

    /// Errors on the first `failures` lookups, then accepts every root.
    struct FlakyChecker {
        failures: usize,
        calls: parking_lot::Mutex<usize>,
    }

    #[async_trait]
    impl RootChecker for FlakyChecker {
        async fn is_known_root(&self, _contract: &str, _root: &Element) -> Result<bool, LedgerError> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls <= self.failures {
                return Err(LedgerError::InvalidResponse("eth_call timed out".into()));
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn root_lookup_is_retried() {
        let svc = service(false).with_retry(RetryPolicy::new(3, Duration::from_millis(1)));
        let tree = svc.build_tree(TreeInput::Full(leaves(4))).await.unwrap();

        let flaky = FlakyChecker {
            failures: 2,
            calls: parking_lot::Mutex::new(0),
        };
        assert!(svc.verify(&tree, &flaky, "0xpool").await.unwrap());
        assert_eq!(*flaky.calls.lock(), 3);

        let down = FlakyChecker {
            failures: 10,
            calls: parking_lot::Mutex::new(0),
        };
        assert!(matches!(
            svc.verify(&tree, &down, "0xpool").await,
            Err(LedgerError::InvalidResponse(_))
        ));
        assert_eq!(*down.calls.lock(), 3);
    }

    #[tokio::test]
    async fn verify_consults_root_checker() {
        let svc = service(false);
        let tree = svc.build_tree(TreeInput::Full(leaves(3))).await.unwrap();
        let accepting = FixedRoots(vec![tree.root()]);
        let rejecting = FixedRoots(vec![]);
        assert!(svc.verify(&tree, &accepting, "0xpool").await.unwrap());
        assert!(!svc.verify(&tree, &rejecting, "0xpool").await.unwrap());
    }
}
