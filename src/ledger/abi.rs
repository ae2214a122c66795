//! Minimal ABI decoding for the events the sync layer consumes.
//!
//! Only static words, `bytes`, and `string` are needed; there is no general ABI type system.

use sha3::{Digest, Keccak256};

use crate::utils::strip_0x;

const WORD: usize = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AbiError {
    #[error("invalid hex payload: {0}")]
    Hex(String),

    #[error("payload too short: need {needed} bytes at offset {offset}, have {len}")]
    OutOfBounds {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("value does not fit in {0}")]
    Overflow(&'static str),

    #[error("invalid utf-8 in string")]
    Utf8,

    #[error("log is missing topic {0}")]
    MissingTopic(usize),

    #[error("unexpected event topic {0}")]
    UnknownEvent(String),
}

/// Keccak-256 of an event signature, as a `0x`-hex topic.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

/// First four bytes of the Keccak-256 of a function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// Decode a `0x`-hex string into bytes.
pub fn decode_hex(value: &str) -> Result<Vec<u8>, AbiError> {
    hex::decode(strip_0x(value)).map_err(|e| AbiError::Hex(e.to_string()))
}

/// Address stored in an indexed topic (last 20 bytes of the word).
pub fn topic_address(topic: &str) -> Result<String, AbiError> {
    let bytes = decode_hex(topic)?;
    if bytes.len() != WORD {
        return Err(AbiError::OutOfBounds {
            offset: 0,
            needed: WORD,
            len: bytes.len(),
        });
    }
    Ok(format!("0x{}", hex::encode(&bytes[12..])))
}

/// Unsigned integer stored in an indexed topic.
pub fn topic_u64(topic: &str) -> Result<u64, AbiError> {
    AbiWords::from_hex(topic)?.uint_u64(0)
}

/// Reader over a sequence of 32-byte ABI words.
#[derive(Debug, Clone)]
pub struct AbiWords {
    bytes: Vec<u8>,
}

impl AbiWords {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_hex(data: &str) -> Result<Self, AbiError> {
        Ok(Self::new(decode_hex(data)?))
    }

    pub fn word_count(&self) -> usize {
        self.bytes.len() / WORD
    }

    fn slice(&self, offset: usize, needed: usize) -> Result<&[u8], AbiError> {
        let end = offset.checked_add(needed).ok_or(AbiError::Overflow("usize"))?;
        self.bytes
            .get(offset..end)
            .ok_or(AbiError::OutOfBounds {
                offset,
                needed,
                len: self.bytes.len(),
            })
    }

    pub fn word(&self, index: usize) -> Result<&[u8], AbiError> {
        self.slice(index * WORD, WORD)
    }

    pub fn bytes32(&self, index: usize) -> Result<[u8; 32], AbiError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.word(index)?);
        Ok(out)
    }

    /// The word as a `0x`-hex string.
    pub fn word_hex(&self, index: usize) -> Result<String, AbiError> {
        Ok(format!("0x{}", hex::encode(self.word(index)?)))
    }

    pub fn address(&self, index: usize) -> Result<String, AbiError> {
        Ok(format!("0x{}", hex::encode(&self.word(index)?[12..])))
    }

    pub fn uint_u64(&self, index: usize) -> Result<u64, AbiError> {
        let word = self.word(index)?;
        if word[..24].iter().any(|b| *b != 0) {
            return Err(AbiError::Overflow("u64"));
        }
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&word[24..]);
        Ok(u64::from_be_bytes(tail))
    }

    pub fn uint_u32(&self, index: usize) -> Result<u32, AbiError> {
        u32::try_from(self.uint_u64(index)?).map_err(|_| AbiError::Overflow("u32"))
    }

    /// Full-width uint as a decimal string (token amounts exceed `u64`).
    pub fn uint_decimal(&self, index: usize) -> Result<String, AbiError> {
        let word = self.word(index)?;
        Ok(u256_to_decimal(word))
    }

    pub fn bool(&self, index: usize) -> Result<bool, AbiError> {
        Ok(self.uint_u64(index)? != 0)
    }

    /// Dynamic `bytes` whose head word sits at `index`.
    pub fn dynamic_bytes(&self, index: usize) -> Result<Vec<u8>, AbiError> {
        let offset = usize::try_from(self.uint_u64(index)?).map_err(|_| AbiError::Overflow("usize"))?;
        let len_word = self.slice(offset, WORD)?;
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&len_word[24..]);
        let len = usize::try_from(u64::from_be_bytes(tail)).map_err(|_| AbiError::Overflow("usize"))?;
        Ok(self.slice(offset + WORD, len)?.to_vec())
    }

    pub fn dynamic_bytes_hex(&self, index: usize) -> Result<String, AbiError> {
        Ok(format!("0x{}", hex::encode(self.dynamic_bytes(index)?)))
    }

    pub fn string(&self, index: usize) -> Result<String, AbiError> {
        String::from_utf8(self.dynamic_bytes(index)?).map_err(|_| AbiError::Utf8)
    }
}

/// Big-endian 256-bit unsigned integer to decimal, by repeated division.
fn u256_to_decimal(word: &[u8]) -> String {
    let mut digits = word.to_vec();
    let mut out = Vec::new();
    while digits.iter().any(|b| *b != 0) {
        let mut remainder = 0u32;
        for byte in digits.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 10) as u8;
            remainder = acc % 10;
        }
        out.push(b'0' + remainder as u8);
    }
    if out.is_empty() {
        return "0".to_string();
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Encode helpers used to build call data and test fixtures.
pub mod encode {
    pub fn word_u64(value: u64) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[24..].copy_from_slice(&value.to_be_bytes());
        word
    }

    pub fn word_address(address: &str) -> [u8; 32] {
        let mut word = [0u8; 32];
        if let Ok(bytes) = super::decode_hex(address) {
            let take = bytes.len().min(20);
            word[32 - take..].copy_from_slice(&bytes[bytes.len() - take..]);
        }
        word
    }

    /// ABI-encode one dynamic `bytes` value as the tail of a single-argument payload.
    pub fn dynamic_bytes_tail(value: &[u8]) -> Vec<u8> {
        let mut out = word_u64(value.len() as u64).to_vec();
        out.extend_from_slice(value);
        let padding = (32 - value.len() % 32) % 32;
        out.extend(std::iter::repeat_n(0u8, padding));
        out
    }

    pub fn to_hex(words: &[u8]) -> String {
        format!("0x{}", hex::encode(words))
    }
}
