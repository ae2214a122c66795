//! Types for JSON-RPC ledger integration

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::utils::hex::quantity;

/// Block selector accepted by `eth_getBlockByNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    /// A concrete block height.
    Number(u64),
    /// The ledger's current head.
    Latest,
}

impl BlockTag {
    /// Render the tag as a JSON-RPC parameter.
    pub fn as_param(&self) -> String {
        match self {
            BlockTag::Number(n) => crate::utils::to_quantity(*n),
            BlockTag::Latest => "latest".to_string(),
        }
    }
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockTag::Number(n) => write!(f, "{n}"),
            BlockTag::Latest => f.write_str("latest"),
        }
    }
}

/// Address and topic selector for `eth_getLogs`.
///
/// `topics` is matched against `topic0` only; any listed event signature matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Contract addresses to match (any of).
    pub addresses: Vec<String>,
    /// Event signature hashes to match in `topic0` (any of).
    pub topics: Vec<String>,
}

impl LogFilter {
    pub fn new(addresses: Vec<String>, topics: Vec<String>) -> Self {
        Self { addresses, topics }
    }

    /// Serialize into the `eth_getLogs` parameter object.
    pub fn to_params(&self, from_block: u64, to_block: u64) -> serde_json::Value {
        let address = match self.addresses.as_slice() {
            [single] => serde_json::Value::String(single.clone()),
            many => serde_json::json!(many),
        };
        let mut params = serde_json::json!({
            "address": address,
            "fromBlock": crate::utils::to_quantity(from_block),
            "toBlock": crate::utils::to_quantity(to_block),
        });
        if !self.topics.is_empty() {
            params["topics"] = serde_json::json!([self.topics]);
        }
        params
    }
}

/// A log entry exactly as returned by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawLog {
    /// Emitting contract.
    pub address: String,
    /// Indexed topics, `topics[0]` is the event signature hash.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed data.
    pub data: String,
    #[serde(with = "quantity")]
    pub block_number: u64,
    pub transaction_hash: String,
    #[serde(with = "quantity")]
    pub log_index: u64,
    /// Set by nodes that report logs from reorganized blocks.
    #[serde(default)]
    pub removed: bool,
}

/// The subset of a block header the sync layer consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    #[serde(with = "quantity")]
    pub number: u64,
    #[serde(with = "quantity")]
    pub timestamp: u64,
    #[serde(default)]
    pub hash: Option<String>,
}

/// The subset of a transaction the sync layer consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default, with = "quantity::option")]
    pub block_number: Option<u64>,
}

/// The subset of a transaction receipt the sync layer consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptInfo {
    pub transaction_hash: String,
    #[serde(with = "quantity")]
    pub gas_used: u64,
    /// Legacy receipts carry `effectiveGasPrice`, some nodes omit it.
    #[serde(default, alias = "effectiveGasPrice", with = "quantity::option")]
    pub gas_price: Option<u64>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
    #[serde(default, with = "quantity::option")]
    pub status: Option<u64>,
}

static ACCEPTED_BLOCK_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"after last accepted block (\d+)").ok());

static RANGE_TOO_LARGE_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(returned more than \d+ results|range (is )?too (large|wide|big)|too many (results|logs|blocks)|exceeds? (the )?max(imum)? (block )?range|response size exceeded)",
    )
    .ok()
});

/// Error types for ledger queries
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// Height the remote reported as its last accepted block, when the error says so.
    ///
    /// Matching on message text is a compatibility shim for one ledger implementation; a
    /// remote that words the rejection differently simply never triggers a clamp.
    pub fn accepted_block_limit(&self) -> Option<u64> {
        let message = match self {
            LedgerError::Rpc { message, .. } => message.as_str(),
            LedgerError::InvalidResponse(message) => message.as_str(),
            _ => return None,
        };
        let pattern = ACCEPTED_BLOCK_PATTERN.as_ref()?;
        pattern
            .captures(message)
            .and_then(|captures| captures.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Whether the remote refused a log query for spanning too many blocks or results.
    pub fn is_range_too_large(&self) -> bool {
        let message = match self {
            LedgerError::Rpc { message, .. } => message.as_str(),
            LedgerError::InvalidResponse(message) => message.as_str(),
            _ => return false,
        };
        RANGE_TOO_LARGE_PATTERN
            .as_ref()
            .is_some_and(|pattern| pattern.is_match(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_log_deserializes_rpc_shape() {
        let json = r#"{
            "address": "0xabc",
            "topics": ["0x01", "0x02"],
            "data": "0x",
            "blockNumber": "0x64",
            "transactionHash": "0xdead",
            "logIndex": "0x3",
            "blockHash": "0xbeef"
        }"#;
        let log: RawLog = serde_json::from_str(json).unwrap();
        assert_eq!(log.block_number, 100);
        assert_eq!(log.log_index, 3);
        assert!(!log.removed);
    }

    #[test]
    fn filter_params_use_single_address_and_topic_or_set() {
        let filter = LogFilter::new(
            vec!["0xpool".to_string()],
            vec!["0xaa".to_string(), "0xbb".to_string()],
        );
        let params = filter.to_params(16, 31);
        assert_eq!(params["address"], "0xpool");
        assert_eq!(params["fromBlock"], "0x10");
        assert_eq!(params["toBlock"], "0x1f");
        assert_eq!(params["topics"], serde_json::json!([["0xaa", "0xbb"]]));
    }

    #[test]
    fn accepted_block_limit_is_parsed_from_rpc_message() {
        let err = LedgerError::Rpc {
            code: -32000,
            message: "requested to block 900 after last accepted block 812".to_string(),
        };
        assert_eq!(err.accepted_block_limit(), Some(812));

        let other = LedgerError::Rpc {
            code: -32000,
            message: "query returned more than 10000 results".to_string(),
        };
        assert_eq!(other.accepted_block_limit(), None);
        assert_eq!(LedgerError::NotFound("x".into()).accepted_block_limit(), None);
    }

    #[test]
    fn range_rejections_are_recognised() {
        for message in [
            "query returned more than 10000 results",
            "eth_getLogs block range too large, max 2000",
            "Log response size exceeded. You can make eth_getLogs requests with up to a 2K block range",
            "exceed maximum block range: 5000",
            "Too many logs in range",
        ] {
            let err = LedgerError::Rpc {
                code: -32005,
                message: message.to_string(),
            };
            assert!(err.is_range_too_large(), "{message}");
        }

        let clamp = LedgerError::Rpc {
            code: -32000,
            message: "requested to block 900 after last accepted block 812".to_string(),
        };
        assert!(!clamp.is_range_too_large());
        assert!(!LedgerError::InvalidResponse("upstream timeout".into()).is_range_too_large());
    }

    #[test]
    fn receipt_accepts_effective_gas_price() {
        let json = r#"{
            "transactionHash": "0x1",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "status": "0x1"
        }"#;
        let receipt: ReceiptInfo = serde_json::from_str(json).unwrap();
        assert_eq!(receipt.gas_used, 21000);
        assert_eq!(receipt.gas_price, Some(1_000_000_000));
        assert!(receipt.logs.is_empty());
    }
}
