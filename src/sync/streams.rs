//! Stream kinds, canonical stream keys, and the per-kind strategy table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::log_processor;
use super::records::EventPayload;
use crate::ledger::RawLog;
use crate::ledger::abi::AbiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Deposits,
    Withdrawals,
    Governance,
    Registry,
    Revenue,
    Echo,
    EncryptedNotes,
}

impl StreamKind {
    pub const ALL: [StreamKind; 7] = [
        StreamKind::Deposits,
        StreamKind::Withdrawals,
        StreamKind::Governance,
        StreamKind::Registry,
        StreamKind::Revenue,
        StreamKind::Echo,
        StreamKind::EncryptedNotes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Deposits => "deposits",
            StreamKind::Withdrawals => "withdrawals",
            StreamKind::Governance => "governance",
            StreamKind::Registry => "registry",
            StreamKind::Revenue => "revenue",
            StreamKind::Echo => "echo",
            StreamKind::EncryptedNotes => "encrypted_notes",
        }
    }

    /// Pool streams are scoped by currency and denomination.
    pub fn is_pool_stream(&self) -> bool {
        matches!(self, StreamKind::Deposits | StreamKind::Withdrawals)
    }

    pub fn strategy(&self) -> &'static StreamStrategy {
        match self {
            StreamKind::Deposits => &DEPOSITS,
            StreamKind::Withdrawals => &WITHDRAWALS,
            StreamKind::Governance => &GOVERNANCE,
            StreamKind::Registry => &REGISTRY,
            StreamKind::Revenue => &REVENUE,
            StreamKind::Echo => &ECHO,
            StreamKind::EncryptedNotes => &ENCRYPTED_NOTES,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra ledger lookups a kind needs before its records are complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enrichment {
    None,
    /// Fill the depositor from the transaction sender.
    TransactionSender,
    /// Fill the timestamp from the block header.
    BlockTimestamp,
}

/// How one stream kind is selected, decoded and completed.
pub struct StreamStrategy {
    pub kind: StreamKind,
    pub event_signatures: &'static [&'static str],
    pub parse_raw: fn(&RawLog) -> Result<EventPayload, AbiError>,
    pub enrichment: Enrichment,
}

impl fmt::Debug for StreamStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamStrategy")
            .field("kind", &self.kind)
            .field("event_signatures", &self.event_signatures)
            .field("enrichment", &self.enrichment)
            .finish()
    }
}

impl StreamStrategy {
    /// `topic0` values selecting this kind's logs.
    pub fn topics(&self) -> Vec<String> {
        self.event_signatures
            .iter()
            .map(|sig| crate::ledger::abi::event_topic(sig))
            .collect()
    }
}

static DEPOSITS: StreamStrategy = StreamStrategy {
    kind: StreamKind::Deposits,
    event_signatures: &[log_processor::DEPOSIT_EVENT],
    parse_raw: log_processor::parse_deposit,
    enrichment: Enrichment::TransactionSender,
};

static WITHDRAWALS: StreamStrategy = StreamStrategy {
    kind: StreamKind::Withdrawals,
    event_signatures: &[log_processor::WITHDRAWAL_EVENT],
    parse_raw: log_processor::parse_withdrawal,
    enrichment: Enrichment::BlockTimestamp,
};

static GOVERNANCE: StreamStrategy = StreamStrategy {
    kind: StreamKind::Governance,
    event_signatures: &[
        log_processor::PROPOSAL_CREATED_EVENT,
        log_processor::VOTED_EVENT,
        log_processor::DELEGATED_EVENT,
        log_processor::UNDELEGATED_EVENT,
    ],
    parse_raw: log_processor::parse_governance,
    enrichment: Enrichment::None,
};

static REGISTRY: StreamStrategy = StreamStrategy {
    kind: StreamKind::Registry,
    event_signatures: &[log_processor::RELAYER_REGISTERED_EVENT],
    parse_raw: log_processor::parse_relayer_registered,
    enrichment: Enrichment::None,
};

static REVENUE: StreamStrategy = StreamStrategy {
    kind: StreamKind::Revenue,
    event_signatures: &[log_processor::STAKE_BURNED_EVENT],
    parse_raw: log_processor::parse_stake_burned,
    enrichment: Enrichment::None,
};

static ECHO: StreamStrategy = StreamStrategy {
    kind: StreamKind::Echo,
    event_signatures: &[log_processor::ECHO_EVENT],
    parse_raw: log_processor::parse_echo,
    enrichment: Enrichment::None,
};

static ENCRYPTED_NOTES: StreamStrategy = StreamStrategy {
    kind: StreamKind::EncryptedNotes,
    event_signatures: &[log_processor::ENCRYPTED_NOTE_EVENT],
    parse_raw: log_processor::parse_encrypted_note,
    enrichment: Enrichment::None,
};

/// Canonical stream name, also the cache and snapshot key.
///
/// Pool streams: `{kind}_{net}_{currency}_{amount}`; others: `{kind}_{net}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub kind: StreamKind,
    pub net_id: u64,
    pub pool: Option<PoolId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId {
    pub currency: String,
    pub amount: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid stream key {key:?}: {reason}")]
pub struct StreamKeyError {
    pub key: String,
    pub reason: String,
}

impl StreamKey {
    pub fn pool(kind: StreamKind, net_id: u64, currency: &str, amount: &str) -> Self {
        Self {
            kind,
            net_id,
            pool: Some(PoolId {
                currency: currency.to_ascii_lowercase(),
                amount: amount.to_string(),
            }),
        }
    }

    pub fn network(kind: StreamKind, net_id: u64) -> Self {
        Self {
            kind,
            net_id,
            pool: None,
        }
    }

    pub fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pool {
            Some(pool) => write!(
                f,
                "{}_{}_{}_{}",
                self.kind, self.net_id, pool.currency, pool.amount
            ),
            None => write!(f, "{}_{}", self.kind, self.net_id),
        }
    }
}

impl FromStr for StreamKey {
    type Err = StreamKeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let fail = |reason: &str| StreamKeyError {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        // kind names may themselves contain underscores, so match on the prefix
        let (kind, rest) = StreamKind::ALL
            .iter()
            .filter_map(|kind| {
                key.strip_prefix(kind.as_str())
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| (*kind, rest))
            })
            .max_by_key(|(kind, _)| kind.as_str().len())
            .ok_or_else(|| fail("unknown stream kind"))?;

        let parts: Vec<&str> = rest.split('_').collect();
        let net_id = parts
            .first()
            .and_then(|n| n.parse::<u64>().ok())
            .ok_or_else(|| fail("missing or non-numeric network id"))?;

        match (kind.is_pool_stream(), parts.as_slice()) {
            (true, [_, currency, amount]) if !currency.is_empty() && !amount.is_empty() => {
                Ok(StreamKey::pool(kind, net_id, currency, amount))
            }
            (true, _) => Err(fail("pool streams need `{net}_{currency}_{amount}`")),
            (false, [_]) => Ok(StreamKey::network(kind, net_id)),
            (false, _) => Err(fail("unexpected suffix")),
        }
    }
}

/// A configured stream: where its events are emitted and how it may be seeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub key: StreamKey,
    /// Contract emitting the stream's events.
    pub address: String,
    /// First block that can hold an event of this stream.
    pub deployed_block: u64,
    /// Expected `sha384-...` digest of the remote snapshot, if pinned.
    pub snapshot_digest: Option<String>,
}

impl StreamTarget {
    pub fn new(key: StreamKey, address: impl Into<String>, deployed_block: u64) -> Self {
        Self {
            key,
            address: address.into(),
            deployed_block,
            snapshot_digest: None,
        }
    }

    pub fn with_snapshot_digest(mut self, digest: impl Into<String>) -> Self {
        self.snapshot_digest = Some(digest.into());
        self
    }

    pub fn kind(&self) -> StreamKind {
        self.key.kind
    }

    /// Height at which a cold sync is considered to stand.
    pub fn genesis_height(&self) -> u64 {
        self.deployed_block.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip_through_display() {
        for key in [
            "deposits_1_eth_0.1",
            "withdrawals_56_bnb_100",
            "governance_1",
            "registry_1",
            "revenue_1",
            "echo_100",
            "encrypted_notes_137",
        ] {
            let parsed: StreamKey = key.parse().unwrap();
            assert_eq!(parsed.to_string(), key);
        }
    }

    #[test]
    fn pool_keys_carry_currency_and_amount() {
        let key: StreamKey = "deposits_1_ETH_0.1".parse().unwrap();
        assert_eq!(key.kind, StreamKind::Deposits);
        assert_eq!(key.net_id, 1);
        let pool = key.pool.unwrap();
        assert_eq!(pool.currency, "eth");
        assert_eq!(pool.amount, "0.1");
    }

    #[test]
    fn malformed_keys_are_rejected() {
        for key in [
            "deposits_1",
            "deposits_x_eth_1",
            "governance_1_extra",
            "mystery_1",
            "encrypted_1",
            "",
        ] {
            assert!(key.parse::<StreamKey>().is_err(), "{key}");
        }
    }

    #[test]
    fn every_kind_has_topics() {
        for kind in StreamKind::ALL {
            let strategy = kind.strategy();
            assert_eq!(strategy.kind, kind);
            assert!(!strategy.topics().is_empty());
        }
        assert_eq!(StreamKind::Governance.strategy().topics().len(), 4);
    }
}
