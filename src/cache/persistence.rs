//! Cache persistence service for stream synchronization.
//!
//! This module provides the `CachePersistenceService`, which the pipeline uses to read the local
//! tier at the start of a sync call and to write the reconciled stream back at the end. The local
//! tier is best-effort: if the backend could not be opened every read is a miss and every write
//! is skipped, and individual read or write failures are logged and absorbed, so the pipeline
//! simply behaves as if it were starting cold.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::CachedStream;
use super::repositories::{FileStreamCacheRepository, StreamCacheRepository};

/// Service for managing the local cache tier.
#[derive(Clone)]
pub struct CachePersistenceService {
    repo: Option<Arc<dyn StreamCacheRepository>>,
}

impl CachePersistenceService {
    pub fn new(repo: Arc<dyn StreamCacheRepository>) -> Self {
        Self { repo: Some(repo) }
    }

    /// A service with no backend: reads miss, writes are dropped.
    pub fn unavailable() -> Self {
        Self { repo: None }
    }

    /// Open the file-backed tier under `data_dir`, or fall back to [`Self::unavailable`].
    pub async fn open(data_dir: PathBuf) -> Self {
        match FileStreamCacheRepository::open(data_dir.clone()).await {
            Ok(repo) => {
                info!("Using local cache at {:?}", data_dir);
                Self::new(Arc::new(repo))
            }
            Err(e) => {
                warn!("Local cache unavailable, every sync starts cold: {}", e);
                Self::unavailable()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.repo.is_some()
    }

    /// Load the entry for `key`. Errors are logged and read as a miss.
    pub async fn load(&self, key: &str) -> Option<CachedStream> {
        let repo = self.repo.as_ref()?;
        match repo.load(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to read cache entry {}, treating as empty: {}", key, e);
                None
            }
        }
    }

    /// Replace the entry for `key`. Returns whether the write reached the backend.
    pub async fn save(&self, key: &str, stream: &CachedStream) -> bool {
        let Some(repo) = self.repo.as_ref() else {
            return false;
        };
        match repo.save(key, stream).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist cache entry {}: {}", key, e);
                false
            }
        }
    }
}

impl std::fmt::Debug for CachePersistenceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachePersistenceService")
            .field("available", &self.is_available())
            .finish()
    }
}
