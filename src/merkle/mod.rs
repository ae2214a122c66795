//! Commitment tree reconstruction and verification.

pub mod hasher;
pub mod service;
pub mod tree;

pub use hasher::{Element, ElementParseError, Keccak256Hasher, Sha256Hasher, TreeHasher};
pub use service::{BuiltTree, MerkleTreeService, TreeInput};
pub use tree::{DEFAULT_TREE_LEVELS, MerklePath, MerkleTree, PartialMerkleTree, TreeEdge, TreeError};

/// Zero leaf of the reference pool deployment: `keccak256("tornado") % FIELD_SIZE`.
pub const DEFAULT_ZERO_ELEMENT: &str =
    "0x2fe54c60d3acabf3343a35b6eba15db4821b340f76e741e2249685ed4899af6c";
