//! Tree elements and the pluggable pair hash.
//!
//! The protocol's commitment tree uses a domain-specific hash that lives outside this crate; the
//! sync layer only needs something that folds two children into a parent. [`Sha256Hasher`] and
//! [`Keccak256Hasher`] are provided for deployments and tests that do not bring their own.

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::fmt;
use std::str::FromStr;

use crate::utils::strip_0x;

/// A 32-byte tree node (leaf commitment, internal node or root).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Element(pub [u8; 32]);

#[derive(Debug, thiserror::Error)]
#[error("invalid tree element {value:?}: {reason}")]
pub struct ElementParseError {
    value: String,
    reason: String,
}

impl Element {
    /// Parse a `0x`-prefixed (or bare) hex string of at most 32 bytes, left-padded with zeros.
    pub fn from_hex(value: &str) -> Result<Self, ElementParseError> {
        let digits = strip_0x(value);
        let fail = |reason: &str| ElementParseError {
            value: value.to_string(),
            reason: reason.to_string(),
        };
        if digits.is_empty() {
            return Err(fail("empty"));
        }
        if digits.len() > 64 {
            return Err(fail("longer than 32 bytes"));
        }
        let padded = format!("{digits:0>64}");
        let bytes = hex::decode(padded).map_err(|e| fail(&e.to_string()))?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element({})", self.to_hex())
    }
}

impl FromStr for Element {
    type Err = ElementParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Element {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

impl Serialize for Element {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Element {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Element::from_hex(&text).map_err(D::Error::custom)
    }
}

/// Folds two children into their parent.
pub trait TreeHasher: Send + Sync + fmt::Debug {
    fn hash_pair(&self, left: &Element, right: &Element) -> Element;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl TreeHasher for Sha256Hasher {
    fn hash_pair(&self, left: &Element, right: &Element) -> Element {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Element(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256Hasher;

impl TreeHasher for Keccak256Hasher {
    fn hash_pair(&self, left: &Element, right: &Element) -> Element {
        let mut hasher = Keccak256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Element(hasher.finalize().into())
    }
}
