//! Types for the trusted relayer events endpoint

use serde::{Deserialize, Serialize};

use crate::sync::records::EventRecord;
use crate::sync::streams::StreamKind;

/// Body of `POST {relayer}/events`.
///
/// `currency` and `amount` scope pool streams and are omitted for network-wide streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsRequest {
    /// Relayer name of the event stream, see [`relayer_event_type`].
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    pub from_block: u64,
}

/// One page of relayer events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsPage {
    pub events: Vec<EventRecord>,
    /// Height the relayer itself has synced to.
    pub last_sync_block: u64,
}

/// All pages of one request, with the boundary blocks already stitched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayerEvents {
    pub records: Vec<EventRecord>,
    pub last_sync_block: u64,
    pub pages: usize,
}

/// Name the relayer uses for a stream kind.
pub fn relayer_event_type(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Deposits => "deposit",
        StreamKind::Withdrawals => "withdrawal",
        StreamKind::Governance => "governance",
        StreamKind::Registry => "registered",
        StreamKind::Revenue => "revenue",
        StreamKind::Echo => "echo",
        StreamKind::EncryptedNotes => "encrypted_notes",
    }
}

/// Error types for relayer requests
#[derive(Debug, thiserror::Error)]
pub enum RelayerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Relayer answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid relayer page: {0}")]
    InvalidPage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_wire_names() {
        let request = EventsRequest {
            event_type: relayer_event_type(StreamKind::Deposits).to_string(),
            currency: Some("eth".into()),
            amount: Some("0.1".into()),
            from_block: 111,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "deposit", "currency": "eth", "amount": "0.1", "fromBlock": 111})
        );

        let governance = EventsRequest {
            event_type: relayer_event_type(StreamKind::Governance).to_string(),
            currency: None,
            amount: None,
            from_block: 0,
        };
        let json = serde_json::to_value(&governance).unwrap();
        assert!(json.get("currency").is_none());
    }
}
