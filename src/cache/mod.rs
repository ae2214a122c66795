//! Storage tiers that seed a sync call before the live ledger is queried.
//!
//! - `repositories`: the local persistent tier, one records file and one "last sync" record per
//!   stream key.
//! - `persistence`: the service the pipeline talks to; it hides an unavailable backend behind
//!   cache-miss reads and no-op writes.
//! - `snapshot`: the remote static tier, a digest-checked zip export per stream key.

/// Local cache persistence service
pub mod persistence;
/// Local cache repositories
pub mod repositories;
/// Remote snapshot loader
pub mod snapshot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::merkle::TreeEdge;
use crate::sync::records::EventRecord;

pub use persistence::CachePersistenceService;
pub use repositories::{
    FileStreamCacheRepository, InMemoryStreamCacheRepository, StreamCacheRepository,
};
pub use snapshot::{SnapshotError, SnapshotLoader, decode_snapshot, snapshot_digest};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Everything the local tier keeps for one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStream {
    pub records: Vec<EventRecord>,
    pub height: u64,
    /// Edge at the last deposit leaf, deposit streams only.
    #[serde(default)]
    pub tree_edge: Option<TreeEdge>,
    pub synced_at: DateTime<Utc>,
}

impl CachedStream {
    pub fn new(records: Vec<EventRecord>, height: u64, tree_edge: Option<TreeEdge>) -> Self {
        Self {
            records,
            height,
            tree_edge,
            synced_at: Utc::now(),
        }
    }
}
