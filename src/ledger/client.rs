//!
//! JSON-RPC client for EVM-style ledgers.
//!
//! This module provides an async client for the handful of `eth_*` methods the sync layer
//! needs. Error objects returned by the node are preserved verbatim in [`LedgerError::Rpc`] so
//! callers can inspect the message text.

use super::abi::function_selector;
use super::source::{LedgerSource, RootChecker};
use super::types::*;
use crate::merkle::Element;
use crate::utils::parse_quantity;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// JSON-RPC ledger client
pub struct JsonRpcLedgerClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// The node's JSON-RPC endpoint.
	rpc_url: String,
	/// Monotonic request id.
	next_id: AtomicU64,
}

impl JsonRpcLedgerClient {
	/// Create a new ledger client.
	///
	/// # Arguments
	/// * `rpc_url` - The JSON-RPC HTTP endpoint.
	/// * `timeout` - Per-request timeout.
	///
	/// # Returns
	/// A new `JsonRpcLedgerClient`, or a `LedgerError` if the HTTP client cannot be built.
	pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, LedgerError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			next_id: AtomicU64::new(1),
		})
	}

	pub fn rpc_url(&self) -> &str {
		&self.rpc_url
	}

	/// Execute a JSON-RPC call and deserialize its `result`.
	///
	/// # Arguments
	/// * `method` - The RPC method name.
	/// * `params` - Positional parameters.
	///
	/// # Returns
	/// The decoded result, or a `LedgerError` for transport failures, error objects and
	/// malformed replies.
	pub async fn execute_rpc<T: DeserializeOwned>(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<T, LedgerError> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params,
		});
		trace!(method, id, "Sending JSON-RPC request");

		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(LedgerError::InvalidResponse(format!(
				"HTTP error: {}",
				response.status()
			)));
		}

		let mut response_json: serde_json::Value = response.json().await?;

		if let Some(error) = response_json.get("error") {
			let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or_default();
			let message = error
				.get("message")
				.and_then(|m| m.as_str())
				.unwrap_or("Unknown JSON-RPC error")
				.to_string();
			debug!(method, code, %message, "JSON-RPC error");
			return Err(LedgerError::Rpc { code, message });
		}

		let result = response_json
			.get_mut("result")
			.map(serde_json::Value::take)
			.ok_or_else(|| {
				LedgerError::InvalidResponse(format!("{method}: response has no result"))
			})?;

		Ok(serde_json::from_value(result)?)
	}
}

#[async_trait]
impl LedgerSource for JsonRpcLedgerClient {
	async fn get_logs(
		&self,
		filter: &LogFilter,
		from_block: u64,
		to_block: u64,
	) -> Result<Vec<RawLog>, LedgerError> {
		self.execute_rpc("eth_getLogs", json!([filter.to_params(from_block, to_block)]))
			.await
	}

	async fn get_block(&self, tag: BlockTag) -> Result<Option<BlockInfo>, LedgerError> {
		self.execute_rpc("eth_getBlockByNumber", json!([tag.as_param(), false]))
			.await
	}

	async fn get_transaction(&self, hash: &str) -> Result<Option<TransactionInfo>, LedgerError> {
		self.execute_rpc("eth_getTransactionByHash", json!([hash]))
			.await
	}

	async fn get_transaction_receipt(
		&self,
		hash: &str,
	) -> Result<Option<ReceiptInfo>, LedgerError> {
		self.execute_rpc("eth_getTransactionReceipt", json!([hash]))
			.await
	}

	async fn get_block_number(&self) -> Result<u64, LedgerError> {
		let height: String = self.execute_rpc("eth_blockNumber", json!([])).await?;
		parse_quantity(&height).map_err(LedgerError::InvalidResponse)
	}
}

#[async_trait]
impl RootChecker for JsonRpcLedgerClient {
	async fn is_known_root(&self, contract: &str, root: &Element) -> Result<bool, LedgerError> {
		let mut call_data = function_selector("isKnownRoot(bytes32)").to_vec();
		call_data.extend_from_slice(root.as_bytes());
		let call = json!({
			"to": contract,
			"data": format!("0x{}", hex::encode(call_data)),
		});

		let reply: String = self.execute_rpc("eth_call", json!([call, "latest"])).await?;
		decode_bool_reply(&reply)
	}
}

fn decode_bool_reply(reply: &str) -> Result<bool, LedgerError> {
	let bytes = super::abi::decode_hex(reply)
		.map_err(|e| LedgerError::InvalidResponse(format!("isKnownRoot: {e}")))?;
	if bytes.len() != 32 {
		return Err(LedgerError::InvalidResponse(format!(
			"isKnownRoot: expected a 32-byte word, got {} bytes",
			bytes.len()
		)));
	}
	Ok(bytes.iter().any(|b| *b != 0))
}
