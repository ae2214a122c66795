//! Record validation ahead of persistence.
//!
//! Every record the local cache does not already vouch for passes a per-kind shape check from the
//! [`ValidatorRegistry`]. Deposit streams additionally need gapless leaf indices in chain order;
//! the Merkle anchoring happens in the pipeline once the indices are known to be sound.

use std::collections::HashMap;
use tracing::debug;

use super::records::{EventPayload, EventRecord, GovernanceEvent};
use super::streams::StreamKind;
use super::types::SyncError;

/// Shape check for one record. The error is a human-readable reason.
pub type RecordValidator = fn(&EventRecord) -> Result<(), String>;

/// Per-kind record validators, built once and handed to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<StreamKind, RecordValidator>,
}

impl ValidatorRegistry {
    /// A registry with no validators; every record passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validators for every built-in stream kind.
    pub fn standard() -> Self {
        Self::new()
            .with(StreamKind::Deposits, validate_deposit)
            .with(StreamKind::Withdrawals, validate_withdrawal)
            .with(StreamKind::Governance, validate_governance)
            .with(StreamKind::Registry, validate_registry)
            .with(StreamKind::Revenue, validate_revenue)
            .with(StreamKind::Echo, validate_echo)
            .with(StreamKind::EncryptedNotes, validate_encrypted_note)
    }

    pub fn with(mut self, kind: StreamKind, validator: RecordValidator) -> Self {
        self.register(kind, validator);
        self
    }

    /// Install or replace the validator for `kind`.
    pub fn register(&mut self, kind: StreamKind, validator: RecordValidator) {
        self.validators.insert(kind, validator);
    }

    pub fn contains(&self, kind: StreamKind) -> bool {
        self.validators.contains_key(&kind)
    }

    /// Check `records`, failing on the first one with a bad shape.
    pub fn validate(
        &self,
        kind: StreamKind,
        stream: &str,
        records: &[EventRecord],
    ) -> Result<(), SyncError> {
        let Some(validator) = self.validators.get(&kind) else {
            debug!("No validator registered for {}, skipping shape checks", kind);
            return Ok(());
        };

        for record in records {
            validator(record)
                .and_then(|()| check_hex(&record.transaction_hash, Some(32), "transaction hash"))
                .map_err(|reason| SyncError::InvalidRecord {
                    stream: stream.to_string(),
                    block_number: record.block_number,
                    transaction_hash: record.transaction_hash.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

/// Require `leaf_index == position` over deposit records in chain order.
pub fn check_leaf_indices(stream: &str, records: &[EventRecord]) -> Result<(), SyncError> {
    for (position, record) in records.iter().enumerate() {
        let Some(leaf_index) = record.leaf_index() else {
            continue;
        };
        if u64::from(leaf_index) != position as u64 {
            return Err(SyncError::LeafIndexGap {
                stream: stream.to_string(),
                expected: position as u64,
                found: u64::from(leaf_index),
                block_number: record.block_number,
                transaction_hash: record.transaction_hash.clone(),
            });
        }
    }
    Ok(())
}

fn check_hex(value: &str, bytes: Option<usize>, field: &str) -> Result<(), String> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| format!("{field} {value:?} is not 0x-prefixed"))?;
    if digits.len() % 2 != 0 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format!("{field} {value:?} is not hex"));
    }
    match bytes {
        Some(expected) if digits.len() != expected * 2 => Err(format!(
            "{field} {value:?} is {} bytes, expected {expected}",
            digits.len() / 2
        )),
        _ => Ok(()),
    }
}

fn check_address(value: &str, field: &str) -> Result<(), String> {
    check_hex(value, Some(20), field)
}

fn check_decimal(value: &str, field: &str) -> Result<(), String> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{field} {value:?} is not a decimal integer"));
    }
    Ok(())
}

fn wrong_event(record: &EventRecord, expected: &str) -> String {
    format!("expected a {expected} event, found {}", record.payload.name())
}

fn validate_deposit(record: &EventRecord) -> Result<(), String> {
    match &record.payload {
        EventPayload::Deposit {
            commitment, from, ..
        } => {
            check_hex(commitment, Some(32), "commitment")?;
            check_address(from, "depositor")
        }
        _ => Err(wrong_event(record, "Deposit")),
    }
}

fn validate_withdrawal(record: &EventRecord) -> Result<(), String> {
    match &record.payload {
        EventPayload::Withdrawal {
            nullifier_hash,
            to,
            fee,
            ..
        } => {
            check_hex(nullifier_hash, Some(32), "nullifier hash")?;
            check_address(to, "recipient")?;
            check_decimal(fee, "fee")
        }
        _ => Err(wrong_event(record, "Withdrawal")),
    }
}

fn validate_governance(record: &EventRecord) -> Result<(), String> {
    let EventPayload::Governance(event) = &record.payload else {
        return Err(wrong_event(record, "governance"));
    };
    match event {
        GovernanceEvent::ProposalCreated {
            proposer,
            target,
            start_time,
            end_time,
            ..
        } => {
            check_address(proposer, "proposer")?;
            check_address(target, "target")?;
            if end_time < start_time {
                return Err(format!("proposal ends at {end_time} before it starts at {start_time}"));
            }
            Ok(())
        }
        GovernanceEvent::Voted { voter, votes, .. } => {
            check_address(voter, "voter")?;
            check_decimal(votes, "votes")
        }
        GovernanceEvent::Delegated {
            account,
            delegate_to,
        } => {
            check_address(account, "account")?;
            check_address(delegate_to, "delegate")
        }
        GovernanceEvent::Undelegated {
            account,
            delegate_from,
        } => {
            check_address(account, "account")?;
            check_address(delegate_from, "delegate")
        }
    }
}

fn validate_registry(record: &EventRecord) -> Result<(), String> {
    match &record.payload {
        EventPayload::RelayerRegistered {
            ens_hash,
            relayer_address,
            staked_amount,
            ..
        } => {
            check_hex(ens_hash, Some(32), "ENS hash")?;
            check_address(relayer_address, "relayer")?;
            check_decimal(staked_amount, "stake")
        }
        _ => Err(wrong_event(record, "RelayerRegistered")),
    }
}

fn validate_revenue(record: &EventRecord) -> Result<(), String> {
    match &record.payload {
        EventPayload::Revenue {
            relayer_address,
            amount_burned,
        } => {
            check_address(relayer_address, "relayer")?;
            check_decimal(amount_burned, "amount burned")
        }
        _ => Err(wrong_event(record, "StakeBurned")),
    }
}

fn validate_echo(record: &EventRecord) -> Result<(), String> {
    match &record.payload {
        EventPayload::Echo {
            address,
            encrypted_account,
        } => {
            check_address(address, "address")?;
            check_hex(encrypted_account, None, "encrypted account")
        }
        _ => Err(wrong_event(record, "Echo")),
    }
}

fn validate_encrypted_note(record: &EventRecord) -> Result<(), String> {
    match &record.payload {
        EventPayload::EncryptedNote { encrypted_note } => {
            check_hex(encrypted_note, None, "encrypted note")
        }
        _ => Err(wrong_event(record, "EncryptedNote")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::records::fixtures::{deposit, withdrawal};

    #[test]
    fn contiguous_leaves_pass() {
        let records = vec![deposit(100, 0, 0), deposit(105, 0, 1), deposit(110, 0, 2)];
        assert!(check_leaf_indices("deposits_1_eth_0.1", &records).is_ok());
    }

    #[test]
    fn gap_reports_expected_and_found() {
        let records = vec![
            deposit(100, 0, 0),
            deposit(105, 0, 1),
            deposit(110, 0, 2),
            deposit(120, 0, 3),
            deposit(130, 0, 5),
        ];
        let err = check_leaf_indices("deposits_1_eth_0.1", &records).unwrap_err();
        match err {
            SyncError::LeafIndexGap {
                expected,
                found,
                block_number,
                ..
            } => {
                assert_eq!((expected, found, block_number), (4, 5, 130));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn standard_registry_checks_shapes() {
        let registry = ValidatorRegistry::standard();
        for kind in StreamKind::ALL {
            assert!(registry.contains(kind));
        }
        assert!(
            registry
                .validate(StreamKind::Deposits, "d", &[deposit(1, 0, 0)])
                .is_ok()
        );
        assert!(
            registry
                .validate(StreamKind::Withdrawals, "w", &[withdrawal(1, 0)])
                .is_ok()
        );

        // a withdrawal in a deposit stream
        let err = registry
            .validate(StreamKind::Deposits, "d", &[withdrawal(1, 0)])
            .unwrap_err();
        assert!(err.is_protocol_inconsistency());

        let mut missing_sender = deposit(2, 0, 1);
        if let EventPayload::Deposit { from, .. } = &mut missing_sender.payload {
            from.clear();
        }
        assert!(
            registry
                .validate(StreamKind::Deposits, "d", &[missing_sender])
                .is_err()
        );
    }

    #[test]
    fn custom_validators_replace_standard_ones() {
        fn reject_all(_: &EventRecord) -> Result<(), String> {
            Err("closed".into())
        }
        let mut registry = ValidatorRegistry::standard();
        registry.register(StreamKind::Withdrawals, reject_all);
        assert!(
            registry
                .validate(StreamKind::Withdrawals, "w", &[withdrawal(1, 0)])
                .is_err()
        );
        assert!(
            ValidatorRegistry::new()
                .validate(StreamKind::Withdrawals, "w", &[withdrawal(1, 0)])
                .is_ok()
        );
    }
}
