use crate::cache::{CacheError, SnapshotError};
use crate::fetch::FetchError;
use crate::ledger::LedgerError;
use crate::merkle::{Element, TreeError};
use crate::relayer::RelayerError;
use crate::sync::records::EventRecord;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline states, in the order a sync call visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStage {
	ReadCache,
	ReadSnapshot,
	FetchLive,
	Merge,
	Validate,
	Persist,
	Done,
}

impl fmt::Display for SyncStage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SyncStage::ReadCache => "read-cache",
			SyncStage::ReadSnapshot => "read-snapshot",
			SyncStage::FetchLive => "fetch-live",
			SyncStage::Merge => "merge",
			SyncStage::Validate => "validate",
			SyncStage::Persist => "persist",
			SyncStage::Done => "done",
		};
		f.write_str(name)
	}
}

/// Whether the returned state reflects a completed pass or a fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ValidationStatus {
	/// Every stage completed and every unknown record was validated.
	Valid,
	/// A stage failed; the returned state is the last known-good one.
	Stale { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
	pub status: ValidationStatus,
	/// Records validated during this call (fresh, snapshot or relayer sourced).
	pub validated_records: usize,
	/// Root confirmed by the ledger, deposit streams only.
	pub verified_root: Option<Element>,
}

impl ValidationResult {
	pub fn valid(validated_records: usize, verified_root: Option<Element>) -> Self {
		Self {
			status: ValidationStatus::Valid,
			validated_records,
			verified_root,
		}
	}

	pub fn stale(reason: impl Into<String>) -> Self {
		Self {
			status: ValidationStatus::Stale {
				reason: reason.into(),
			},
			validated_records: 0,
			verified_root: None,
		}
	}

	pub fn is_valid(&self) -> bool {
		matches!(self.status, ValidationStatus::Valid)
	}
}

/// Result of one `sync(stream)` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
	pub stream: String,
	pub records: Vec<EventRecord>,
	pub height: u64,
	pub validation: ValidationResult,
}

/// Error types for stream synchronization
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Configuration error: {0}")]
	Config(String),

	#[error(
		"Leaf index gap in {stream}: expected leaf {expected}, found {found} at block {block_number} (tx {transaction_hash})"
	)]
	LeafIndexGap {
		stream: String,
		expected: u64,
		found: u64,
		block_number: u64,
		transaction_hash: String,
	},

	#[error(
		"Merkle root {root} over {leaf_count} leaves (blocks {from_block}..={to_block}) is not known to {contract} for {stream}"
	)]
	MerkleRootMismatch {
		stream: String,
		contract: String,
		root: Element,
		leaf_count: usize,
		from_block: u64,
		to_block: u64,
	},

	#[error("Invalid record in {stream} at block {block_number} (tx {transaction_hash}): {reason}")]
	InvalidRecord {
		stream: String,
		block_number: u64,
		transaction_hash: String,
		reason: String,
	},

	#[error("Ledger error: {0}")]
	Ledger(#[from] LedgerError),

	#[error("Fetch error: {0}")]
	Fetch(#[from] FetchError),

	#[error("Merkle tree error: {0}")]
	Tree(#[from] TreeError),

	#[error("Cache error: {0}")]
	Cache(#[from] CacheError),

	#[error("Snapshot error: {0}")]
	Snapshot(#[from] SnapshotError),

	#[error("Relayer error: {0}")]
	Relayer(#[from] RelayerError),
}

impl SyncError {
	/// Errors that mean the remote data cannot be trusted.
	pub fn is_protocol_inconsistency(&self) -> bool {
		matches!(
			self,
			SyncError::LeafIndexGap { .. }
				| SyncError::MerkleRootMismatch { .. }
				| SyncError::InvalidRecord { .. }
		)
	}

	/// Errors that abort a sync call instead of degrading to stale state.
	pub fn is_fatal(&self) -> bool {
		self.is_protocol_inconsistency() || matches!(self, SyncError::Config(_))
	}
}
