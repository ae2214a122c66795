//! Query seams over the remote ledger.
//!
//! The pipeline and fetchers only ever see these traits, so tests substitute in-memory ledgers
//! and deployments can wrap providers with their own rate limiting.

use async_trait::async_trait;

use super::types::{BlockInfo, BlockTag, LedgerError, LogFilter, RawLog, ReceiptInfo, TransactionInfo};
use crate::merkle::Element;

/// Read access to ledger history.
#[async_trait]
pub trait LedgerSource: Send + Sync {
	/// Logs matching `filter` in the inclusive block range.
	async fn get_logs(
		&self,
		filter: &LogFilter,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawLog>, LedgerError>;

	/// `Ok(None)` when the ledger has no block for the tag.
	async fn get_block(&self, tag: BlockTag) -> Result<Option<BlockInfo>, LedgerError>;

	async fn get_transaction(&self, hash: &str) -> Result<Option<TransactionInfo>, LedgerError>;

	async fn get_transaction_receipt(
		&self,
		hash: &str,
	) -> Result<Option<ReceiptInfo>, LedgerError>;

	async fn get_block_number(&self) -> Result<u64, LedgerError>;
}

/// The pool contract's "is this root currently accepted" predicate.
#[async_trait]
pub trait RootChecker: Send + Sync {
	async fn is_known_root(&self, contract: &str, root: &Element) -> Result<bool, LedgerError>;
}
