//! Typed event records and their ordering and identity rules.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One decoded protocol event, identified by `(transaction_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EventPayload {
    Deposit {
        commitment: String,
        leaf_index: u32,
        timestamp: u64,
        /// Depositor, filled in from the transaction sender.
        #[serde(default)]
        from: String,
    },
    Withdrawal {
        nullifier_hash: String,
        to: String,
        /// Relayer fee as a decimal string.
        fee: String,
        /// Block timestamp, filled in from the block header.
        #[serde(default)]
        timestamp: u64,
    },
    Governance(GovernanceEvent),
    RelayerRegistered {
        ens_hash: String,
        ens_name: String,
        relayer_address: String,
        staked_amount: String,
    },
    Revenue {
        relayer_address: String,
        amount_burned: String,
    },
    Echo {
        address: String,
        encrypted_account: String,
    },
    EncryptedNote {
        encrypted_note: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GovernanceEvent {
    ProposalCreated {
        id: u64,
        proposer: String,
        target: String,
        start_time: u64,
        end_time: u64,
        description: String,
    },
    Voted {
        proposal_id: u64,
        voter: String,
        support: bool,
        votes: String,
    },
    Delegated {
        account: String,
        delegate_to: String,
    },
    Undelegated {
        account: String,
        delegate_from: String,
    },
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::Deposit { .. } => "Deposit",
            EventPayload::Withdrawal { .. } => "Withdrawal",
            EventPayload::Governance(GovernanceEvent::ProposalCreated { .. }) => "ProposalCreated",
            EventPayload::Governance(GovernanceEvent::Voted { .. }) => "Voted",
            EventPayload::Governance(GovernanceEvent::Delegated { .. }) => "Delegated",
            EventPayload::Governance(GovernanceEvent::Undelegated { .. }) => "Undelegated",
            EventPayload::RelayerRegistered { .. } => "RelayerRegistered",
            EventPayload::Revenue { .. } => "StakeBurned",
            EventPayload::Echo { .. } => "Echo",
            EventPayload::EncryptedNote { .. } => "EncryptedNote",
        }
    }
}

/// Record identity. Hashes compare case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId {
    pub transaction_hash: String,
    pub log_index: u64,
}

impl EventRecord {
    pub fn id(&self) -> RecordId {
        RecordId {
            transaction_hash: self.transaction_hash.to_ascii_lowercase(),
            log_index: self.log_index,
        }
    }

    /// Chain order: `(block_number, log_index)`.
    pub fn chain_order(&self, other: &Self) -> Ordering {
        (self.block_number, self.log_index).cmp(&(other.block_number, other.log_index))
    }

    pub fn leaf_index(&self) -> Option<u32> {
        match &self.payload {
            EventPayload::Deposit { leaf_index, .. } => Some(*leaf_index),
            _ => None,
        }
    }

    pub fn commitment(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Deposit { commitment, .. } => Some(commitment),
            _ => None,
        }
    }
}

/// Concatenate, sort into chain order, and drop repeated identities.
///
/// The sort is stable, so for equal positions the record that came first in `prior ++ incoming`
/// is the one kept.
pub fn merge_records(prior: &[EventRecord], incoming: &[EventRecord]) -> Vec<EventRecord> {
    prior
        .iter()
        .chain(incoming)
        .sorted_by(|a, b| a.chain_order(b))
        .unique_by(|record| record.id())
        .cloned()
        .collect()
}

/// Highest block mentioned by any record.
pub fn max_block(records: &[EventRecord]) -> Option<u64> {
    records.iter().map(|r| r.block_number).max()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn deposit(block_number: u64, log_index: u64, leaf_index: u32) -> EventRecord {
        EventRecord {
            block_number,
            log_index,
            transaction_hash: format!("0x{:064x}", block_number * 1000 + log_index),
            payload: EventPayload::Deposit {
                commitment: format!("0x{:064x}", u64::from(leaf_index) + 1),
                leaf_index,
                timestamp: 1_600_000_000 + block_number,
                from: format!("0x{:040x}", 0xabc),
            },
        }
    }

    pub fn withdrawal(block_number: u64, log_index: u64) -> EventRecord {
        EventRecord {
            block_number,
            log_index,
            transaction_hash: format!("0x{:064x}", block_number * 1000 + log_index),
            payload: EventPayload::Withdrawal {
                nullifier_hash: format!("0x{:064x}", block_number),
                to: format!("0x{:040x}", 0xdef),
                fee: "0".to_string(),
                timestamp: 1_600_000_000 + block_number,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn merge_sorts_by_block_then_log_index() {
        let prior = vec![deposit(110, 0, 2), deposit(100, 5, 0)];
        let incoming = vec![deposit(105, 1, 1), deposit(100, 2, 9)];
        let merged = merge_records(&prior, &incoming);
        let positions: Vec<_> = merged.iter().map(|r| (r.block_number, r.log_index)).collect();
        assert_eq!(positions, vec![(100, 2), (100, 5), (105, 1), (110, 0)]);
    }

    #[test]
    fn merge_is_idempotent() {
        let prior = vec![deposit(100, 0, 0), deposit(105, 0, 1)];
        let batch = vec![deposit(110, 0, 2), withdrawal(111, 3)];
        let once = merge_records(&prior, &batch);
        let twice = merge_records(&once, &batch);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 4);
    }

    #[test]
    fn duplicate_identity_keeps_first_occurrence() {
        let mut original = deposit(100, 0, 0);
        original.transaction_hash = original.transaction_hash.to_ascii_uppercase().replacen("0X", "0x", 1);
        let mut replay = deposit(100, 0, 0);
        if let EventPayload::Deposit { from, .. } = &mut replay.payload {
            *from = "0x0000000000000000000000000000000000000001".to_string();
        }
        let merged = merge_records(&[original.clone()], &[replay]);
        assert_eq!(merged, vec![original]);
    }

    #[test]
    fn records_serialize_flat_with_event_tag() {
        let record = deposit(100, 4, 0);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["event"], "deposit");
        assert_eq!(json["blockNumber"], 100);
        assert_eq!(json["leafIndex"], 0);
        let back: EventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);

        let vote = EventRecord {
            block_number: 7,
            log_index: 0,
            transaction_hash: "0x01".to_string(),
            payload: EventPayload::Governance(GovernanceEvent::Voted {
                proposal_id: 3,
                voter: "0x02".to_string(),
                support: true,
                votes: "1000".to_string(),
            }),
        };
        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["event"], "governance");
        assert_eq!(json["action"], "voted");
        assert_eq!(json["proposalId"], 3);
        let back: EventRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, vote);
    }
}
