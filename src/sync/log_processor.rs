use crate::ledger::RawLog;
use crate::ledger::abi::{AbiError, AbiWords, event_topic, topic_address, topic_u64};
use crate::sync::records::{EventPayload, EventRecord, GovernanceEvent};
use crate::sync::streams::StreamKind;
use crate::sync::types::SyncError;
use crate::utils::normalize_hex;
use std::sync::LazyLock;
use tracing::{debug, error};

pub const DEPOSIT_EVENT: &str = "Deposit(bytes32,uint32,uint256)";
pub const WITHDRAWAL_EVENT: &str = "Withdrawal(address,bytes32,address,uint256)";
pub const PROPOSAL_CREATED_EVENT: &str =
	"ProposalCreated(uint256,address,address,uint256,uint256,string)";
pub const VOTED_EVENT: &str = "Voted(uint256,address,bool,uint256)";
pub const DELEGATED_EVENT: &str = "Delegated(address,address)";
pub const UNDELEGATED_EVENT: &str = "Undelegated(address,address)";
pub const RELAYER_REGISTERED_EVENT: &str = "RelayerRegistered(bytes32,string,address,uint256)";
pub const STAKE_BURNED_EVENT: &str = "StakeBurned(address,uint256)";
pub const ECHO_EVENT: &str = "Echo(address,bytes)";
pub const ENCRYPTED_NOTE_EVENT: &str = "EncryptedNote(address,bytes)";

static GOVERNANCE_TOPICS: LazyLock<[String; 4]> = LazyLock::new(|| {
	[
		event_topic(PROPOSAL_CREATED_EVENT),
		event_topic(VOTED_EVENT),
		event_topic(DELEGATED_EVENT),
		event_topic(UNDELEGATED_EVENT),
	]
});

fn topic(log: &RawLog, index: usize) -> Result<&str, AbiError> {
	log.topics
		.get(index)
		.map(String::as_str)
		.ok_or(AbiError::MissingTopic(index))
}

pub fn parse_deposit(log: &RawLog) -> Result<EventPayload, AbiError> {
	let data = AbiWords::from_hex(&log.data)?;
	Ok(EventPayload::Deposit {
		commitment: normalize_hex(topic(log, 1)?),
		leaf_index: data.uint_u32(0)?,
		timestamp: data.uint_u64(1)?,
		from: String::new(),
	})
}

pub fn parse_withdrawal(log: &RawLog) -> Result<EventPayload, AbiError> {
	let data = AbiWords::from_hex(&log.data)?;
	Ok(EventPayload::Withdrawal {
		to: data.address(0)?,
		nullifier_hash: data.word_hex(1)?,
		fee: data.uint_decimal(2)?,
		timestamp: 0,
	})
}

pub fn parse_governance(log: &RawLog) -> Result<EventPayload, AbiError> {
	let topic0 = normalize_hex(topic(log, 0)?);
	let [created, voted, delegated, undelegated] = &*GOVERNANCE_TOPICS;

	let event = if topic0 == *created {
		let data = AbiWords::from_hex(&log.data)?;
		GovernanceEvent::ProposalCreated {
			id: topic_u64(topic(log, 1)?)?,
			proposer: topic_address(topic(log, 2)?)?,
			target: data.address(0)?,
			start_time: data.uint_u64(1)?,
			end_time: data.uint_u64(2)?,
			description: data.string(3)?,
		}
	} else if topic0 == *voted {
		let data = AbiWords::from_hex(&log.data)?;
		GovernanceEvent::Voted {
			proposal_id: topic_u64(topic(log, 1)?)?,
			voter: topic_address(topic(log, 2)?)?,
			support: topic_u64(topic(log, 3)?)? != 0,
			votes: data.uint_decimal(0)?,
		}
	} else if topic0 == *delegated {
		GovernanceEvent::Delegated {
			account: topic_address(topic(log, 1)?)?,
			delegate_to: topic_address(topic(log, 2)?)?,
		}
	} else if topic0 == *undelegated {
		GovernanceEvent::Undelegated {
			account: topic_address(topic(log, 1)?)?,
			delegate_from: topic_address(topic(log, 2)?)?,
		}
	} else {
		return Err(AbiError::UnknownEvent(topic0));
	};

	Ok(EventPayload::Governance(event))
}

pub fn parse_relayer_registered(log: &RawLog) -> Result<EventPayload, AbiError> {
	let data = AbiWords::from_hex(&log.data)?;
	Ok(EventPayload::RelayerRegistered {
		ens_hash: data.word_hex(0)?,
		ens_name: data.string(1)?,
		relayer_address: data.address(2)?,
		staked_amount: data.uint_decimal(3)?,
	})
}

pub fn parse_stake_burned(log: &RawLog) -> Result<EventPayload, AbiError> {
	let data = AbiWords::from_hex(&log.data)?;
	Ok(EventPayload::Revenue {
		relayer_address: topic_address(topic(log, 1)?)?,
		amount_burned: data.uint_decimal(0)?,
	})
}

pub fn parse_echo(log: &RawLog) -> Result<EventPayload, AbiError> {
	let data = AbiWords::from_hex(&log.data)?;
	Ok(EventPayload::Echo {
		address: topic_address(topic(log, 1)?)?,
		encrypted_account: data.dynamic_bytes_hex(0)?,
	})
}

pub fn parse_encrypted_note(log: &RawLog) -> Result<EventPayload, AbiError> {
	let data = AbiWords::from_hex(&log.data)?;
	Ok(EventPayload::EncryptedNote {
		encrypted_note: data.dynamic_bytes_hex(0)?,
	})
}

/// Decodes raw ledger logs into typed records for one stream kind.
#[derive(Debug, Clone)]
pub struct LogProcessor {
	kind: StreamKind,
	stream: String,
}

impl LogProcessor {
	pub fn new(kind: StreamKind, stream: impl Into<String>) -> Self {
		Self {
			kind,
			stream: stream.into(),
		}
	}

	/// Decode one log. Logs flagged as removed by the node yield `None`.
	pub fn process_log(&self, log: &RawLog) -> Result<Option<EventRecord>, SyncError> {
		if log.removed {
			debug!(
				"Skipping removed log {}:{} at block {}",
				log.transaction_hash, log.log_index, log.block_number
			);
			return Ok(None);
		}

		let payload = (self.kind.strategy().parse_raw)(log).map_err(|e| {
			error!(
				"[PROCESS_LOG] Failed to decode {} log in tx {}: {}",
				self.kind, log.transaction_hash, e
			);
			SyncError::InvalidRecord {
				stream: self.stream.clone(),
				block_number: log.block_number,
				transaction_hash: log.transaction_hash.clone(),
				reason: format!("undecodable log: {e}"),
			}
		})?;

		Ok(Some(EventRecord {
			block_number: log.block_number,
			log_index: log.log_index,
			transaction_hash: normalize_hex(&log.transaction_hash),
			payload,
		}))
	}

	/// Batch process logs, keeping remote order.
	pub fn process_logs_batch(&self, logs: &[RawLog]) -> Result<Vec<EventRecord>, SyncError> {
		let mut processed = Vec::with_capacity(logs.len());

		for log in logs {
			if let Some(record) = self.process_log(log)? {
				processed.push(record);
			}
		}

		Ok(processed)
	}
}
