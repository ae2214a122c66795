//! Fixed-depth binary Merkle trees over deposit commitments.
//!
//! [`MerkleTree`] keeps every layer in memory so proofs and edges can be read back cheaply.
//! [`PartialMerkleTree`] is the same tree with everything left of a known *edge* leaf elided:
//! the edge's authentication path stands in for the missing left siblings, so appending leaves
//! to a tree the cache already vouches for only hashes the new part.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::hasher::{Element, TreeHasher};

pub const DEFAULT_TREE_LEVELS: usize = 20;
const MAX_TREE_LEVELS: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("tree levels must be within 1..={max}, got {0}", max = MAX_TREE_LEVELS)]
    InvalidLevels(usize),

    #[error("tree is full: capacity {capacity}, requested {requested}")]
    Full { capacity: usize, requested: usize },

    #[error("leaf index {index} out of bounds (tree holds {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("invalid tree edge: {0}")]
    InvalidEdge(String),

    #[error("tree worker failed: {0}")]
    Worker(String),
}

/// Authentication path for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerklePath {
    pub element: Element,
    pub path_elements: Vec<Element>,
    /// 0 when the node on the path is a left child, 1 when it is a right child.
    pub path_indices: Vec<u8>,
    pub root: Element,
}

/// Everything needed to continue a tree from leaf `edge_index` without its left part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEdge {
    pub edge_index: usize,
    pub edge_element: Element,
    pub edge_path: Vec<Element>,
    pub edge_elements_count: usize,
}

fn check_levels(levels: usize) -> Result<(), TreeError> {
    if levels == 0 || levels > MAX_TREE_LEVELS {
        return Err(TreeError::InvalidLevels(levels));
    }
    Ok(())
}

/// `zeros[l]` is the root of an empty subtree of height `l`.
pub fn zero_elements(levels: usize, zero_element: Element, hasher: &dyn TreeHasher) -> Vec<Element> {
    let mut zeros = Vec::with_capacity(levels + 1);
    zeros.push(zero_element);
    for level in 0..levels {
        let prev = zeros[level];
        zeros.push(hasher.hash_pair(&prev, &prev));
    }
    zeros
}

#[derive(Clone)]
pub struct MerkleTree {
    levels: usize,
    zeros: Vec<Element>,
    layers: Vec<Vec<Element>>,
    hasher: Arc<dyn TreeHasher>,
}

impl std::fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerkleTree")
            .field("levels", &self.levels)
            .field("len", &self.len())
            .field("root", &self.root())
            .finish()
    }
}

impl MerkleTree {
    pub fn build(
        leaves: Vec<Element>,
        levels: usize,
        zero_element: Element,
        hasher: Arc<dyn TreeHasher>,
    ) -> Result<Self, TreeError> {
        check_levels(levels)?;
        let capacity = 1usize << levels;
        if leaves.len() > capacity {
            return Err(TreeError::Full {
                capacity,
                requested: leaves.len(),
            });
        }
        let zeros = zero_elements(levels, zero_element, hasher.as_ref());
        let mut tree = Self {
            levels,
            zeros,
            layers: vec![Vec::new(); levels + 1],
            hasher,
        };
        tree.layers[0] = leaves;
        tree.rebuild();
        Ok(tree)
    }

    fn rebuild(&mut self) {
        for level in 1..=self.levels {
            let below = &self.layers[level - 1];
            let width = below.len().div_ceil(2);
            let mut layer = Vec::with_capacity(width);
            for i in 0..width {
                let left = below[2 * i];
                let right = below.get(2 * i + 1).copied().unwrap_or(self.zeros[level - 1]);
                layer.push(self.hasher.hash_pair(&left, &right));
            }
            self.layers[level] = layer;
        }
    }

    fn node(&self, level: usize, index: usize) -> Element {
        self.layers[level]
            .get(index)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn capacity(&self) -> usize {
        1usize << self.levels
    }

    pub fn len(&self) -> usize {
        self.layers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    pub fn leaves(&self) -> &[Element] {
        &self.layers[0]
    }

    pub fn root(&self) -> Element {
        self.node(self.levels, 0)
    }

    pub fn index_of(&self, element: &Element) -> Option<usize> {
        self.layers[0].iter().position(|e| e == element)
    }

    /// Append one leaf, rehashing only its path.
    pub fn insert(&mut self, element: Element) -> Result<(), TreeError> {
        if self.len() >= self.capacity() {
            return Err(TreeError::Full {
                capacity: self.capacity(),
                requested: self.len() + 1,
            });
        }
        let mut index = self.len();
        self.layers[0].push(element);
        for level in 1..=self.levels {
            index >>= 1;
            let left = self.node(level - 1, 2 * index);
            let right = self.node(level - 1, 2 * index + 1);
            let parent = self.hasher.hash_pair(&left, &right);
            if index < self.layers[level].len() {
                self.layers[level][index] = parent;
            } else {
                self.layers[level].push(parent);
            }
        }
        Ok(())
    }

    pub fn bulk_insert(&mut self, elements: &[Element]) -> Result<(), TreeError> {
        let requested = self.len() + elements.len();
        if requested > self.capacity() {
            return Err(TreeError::Full {
                capacity: self.capacity(),
                requested,
            });
        }
        self.layers[0].extend_from_slice(elements);
        self.rebuild();
        Ok(())
    }

    pub fn path(&self, index: usize) -> Result<MerklePath, TreeError> {
        if index >= self.len() {
            return Err(TreeError::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        let mut path_elements = Vec::with_capacity(self.levels);
        let mut path_indices = Vec::with_capacity(self.levels);
        for level in 0..self.levels {
            let position = index >> level;
            path_elements.push(self.node(level, position ^ 1));
            path_indices.push((position & 1) as u8);
        }
        Ok(MerklePath {
            element: self.layers[0][index],
            path_elements,
            path_indices,
            root: self.root(),
        })
    }

    pub fn edge(&self, index: usize) -> Result<TreeEdge, TreeError> {
        let path = self.path(index)?;
        Ok(TreeEdge {
            edge_index: index,
            edge_element: path.element,
            edge_path: path.path_elements,
            edge_elements_count: self.len(),
        })
    }
}

/// A tree that only materializes leaves from `edge.edge_index` onward.
#[derive(Clone)]
pub struct PartialMerkleTree {
    levels: usize,
    zeros: Vec<Element>,
    edge: TreeEdge,
    /// `layers[l][0]` sits at index `edge.edge_index >> l`.
    layers: Vec<Vec<Element>>,
    hasher: Arc<dyn TreeHasher>,
}

impl std::fmt::Debug for PartialMerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartialMerkleTree")
            .field("levels", &self.levels)
            .field("edge_index", &self.edge.edge_index)
            .field("len", &self.len())
            .field("root", &self.root())
            .finish()
    }
}

impl PartialMerkleTree {
    /// `leaves[0]` must be the edge element itself.
    pub fn build(
        edge: TreeEdge,
        leaves: Vec<Element>,
        levels: usize,
        zero_element: Element,
        hasher: Arc<dyn TreeHasher>,
    ) -> Result<Self, TreeError> {
        check_levels(levels)?;
        if edge.edge_path.len() != levels {
            return Err(TreeError::InvalidEdge(format!(
                "edge path has {} elements, tree has {} levels",
                edge.edge_path.len(),
                levels
            )));
        }
        match leaves.first() {
            Some(first) if *first == edge.edge_element => {}
            Some(first) => {
                return Err(TreeError::InvalidEdge(format!(
                    "first leaf {} does not match edge element {}",
                    first, edge.edge_element
                )));
            }
            None => {
                return Err(TreeError::InvalidEdge(
                    "partial tree needs at least the edge leaf".to_string(),
                ));
            }
        }
        let capacity = 1usize << levels;
        let requested = edge.edge_index + leaves.len();
        if requested > capacity {
            return Err(TreeError::Full {
                capacity,
                requested,
            });
        }

        let zeros = zero_elements(levels, zero_element, hasher.as_ref());
        let mut tree = Self {
            levels,
            zeros,
            edge,
            layers: vec![Vec::new(); levels + 1],
            hasher,
        };
        tree.layers[0] = leaves;
        tree.rebuild();
        Ok(tree)
    }

    fn offset(&self, level: usize) -> usize {
        self.edge.edge_index >> level
    }

    fn node(&self, level: usize, index: usize) -> Element {
        let offset = self.offset(level);
        if index < offset {
            // only the edge's own left sibling is ever reachable left of the offset
            return self.edge.edge_path[level];
        }
        self.layers[level]
            .get(index - offset)
            .copied()
            .unwrap_or(self.zeros[level])
    }

    fn rebuild(&mut self) {
        for level in 1..=self.levels {
            let below_offset = self.offset(level - 1);
            let below_end = below_offset + self.layers[level - 1].len();
            let first = self.offset(level);
            let last = (below_end - 1) >> 1;
            let mut layer = Vec::with_capacity(last + 1 - first);
            for i in first..=last {
                let left = self.node(level - 1, 2 * i);
                let right = self.node(level - 1, 2 * i + 1);
                layer.push(self.hasher.hash_pair(&left, &right));
            }
            self.layers[level] = layer;
        }
    }

    pub fn edge_index(&self) -> usize {
        self.edge.edge_index
    }

    /// Total leaf count including the elided prefix.
    pub fn len(&self) -> usize {
        self.edge.edge_index + self.layers[0].len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn root(&self) -> Element {
        self.layers[self.levels]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.levels])
    }

    pub fn insert(&mut self, element: Element) -> Result<(), TreeError> {
        let capacity = 1usize << self.levels;
        if self.len() >= capacity {
            return Err(TreeError::Full {
                capacity,
                requested: self.len() + 1,
            });
        }
        self.layers[0].push(element);
        self.rebuild();
        Ok(())
    }

    pub fn path(&self, index: usize) -> Result<MerklePath, TreeError> {
        if index < self.edge.edge_index || index >= self.len() {
            return Err(TreeError::IndexOutOfBounds {
                index,
                len: self.len(),
            });
        }
        let mut path_elements = Vec::with_capacity(self.levels);
        let mut path_indices = Vec::with_capacity(self.levels);
        for level in 0..self.levels {
            let position = index >> level;
            path_elements.push(self.node(level, position ^ 1));
            path_indices.push((position & 1) as u8);
        }
        Ok(MerklePath {
            element: self.node(0, index),
            path_elements,
            path_indices,
            root: self.root(),
        })
    }

    pub fn edge(&self, index: usize) -> Result<TreeEdge, TreeError> {
        let path = self.path(index)?;
        Ok(TreeEdge {
            edge_index: index,
            edge_element: path.element,
            edge_path: path.path_elements,
            edge_elements_count: self.len(),
        })
    }
}
