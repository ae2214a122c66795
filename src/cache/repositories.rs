use super::{CacheError, CachedStream};
use crate::merkle::TreeEdge;
use crate::sync::records::EventRecord;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Repository for per-stream cache entries
#[async_trait::async_trait]
pub trait StreamCacheRepository: Send + Sync {
	async fn load(&self, key: &str) -> Result<Option<CachedStream>, CacheError>;
	/// Replace the whole entry for `key`.
	async fn save(&self, key: &str, stream: &CachedStream) -> Result<(), CacheError>;
}

/// The "last sync" record, written after the records file it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastSyncRecord {
	height: u64,
	record_count: usize,
	#[serde(default)]
	tree_edge: Option<TreeEdge>,
	synced_at: DateTime<Utc>,
}

/// File-based implementation of StreamCacheRepository
pub struct FileStreamCacheRepository {
	data_dir: PathBuf,
}

impl FileStreamCacheRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	/// Create the directory layout, failing if the location is not writable.
	pub async fn open(data_dir: PathBuf) -> Result<Self, CacheError> {
		let last_sync_dir = data_dir.join("last_sync");
		tokio::fs::create_dir_all(&last_sync_dir)
			.await
			.map_err(|e| CacheError::io(&last_sync_dir, e))?;

		let write_check = data_dir.join(".write-check");
		tokio::fs::write(&write_check, b"")
			.await
			.map_err(|e| CacheError::io(&write_check, e))?;
		let _ = tokio::fs::remove_file(&write_check).await;

		Ok(Self::new(data_dir))
	}

	pub fn data_dir(&self) -> &Path {
		&self.data_dir
	}

	fn get_records_filename(&self, key: &str) -> PathBuf {
		self.data_dir.join(format!("{}.events.json", key))
	}

	fn get_last_sync_filename(&self, key: &str) -> PathBuf {
		self.data_dir.join("last_sync").join(format!("{}.json", key))
	}
}

/// Write to a sibling temp file, then rename over the target.
async fn write_replacing(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent)
			.await
			.map_err(|e| CacheError::io(parent, e))?;
	}

	let mut temp = path.as_os_str().to_owned();
	temp.push(".tmp");
	let temp = PathBuf::from(temp);

	tokio::fs::write(&temp, contents)
		.await
		.map_err(|e| CacheError::io(&temp, e))?;
	tokio::fs::rename(&temp, path)
		.await
		.map_err(|e| CacheError::io(path, e))
}

#[async_trait::async_trait]
impl StreamCacheRepository for FileStreamCacheRepository {
	async fn load(&self, key: &str) -> Result<Option<CachedStream>, CacheError> {
		let filename = self.get_records_filename(key);
		let last_sync_filename = self.get_last_sync_filename(key);

		// Without a last sync record nothing was ever committed
		let last_sync = match tokio::fs::read(&last_sync_filename).await {
			Ok(bytes) => serde_json::from_slice::<LastSyncRecord>(&bytes)?,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(CacheError::io(&last_sync_filename, e)),
		};

		let records_bytes = match tokio::fs::read(&filename).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!(
					"Last sync record for {} has no records file, treating as empty",
					key
				);
				return Ok(None);
			}
			Err(e) => return Err(CacheError::io(&filename, e)),
		};
		let records: Vec<EventRecord> = serde_json::from_slice(&records_bytes)?;

		// A write interrupted between the two files leaves the counts disagreeing
		if records.len() != last_sync.record_count {
			warn!(
				"Cache entry {} holds {} records but last sync recorded {}, treating as empty",
				key,
				records.len(),
				last_sync.record_count
			);
			return Ok(None);
		}

		debug!(
			"Loaded {} cached records for {} at height {}",
			records.len(),
			key,
			last_sync.height
		);
		Ok(Some(CachedStream {
			records,
			height: last_sync.height,
			tree_edge: last_sync.tree_edge,
			synced_at: last_sync.synced_at,
		}))
	}

	async fn save(&self, key: &str, stream: &CachedStream) -> Result<(), CacheError> {
		// Records first, so a crash never leaves the height ahead of its records
		let filename = self.get_records_filename(key);
		let records_json = serde_json::to_vec(&stream.records)?;
		write_replacing(&filename, &records_json).await?;

		let last_sync = LastSyncRecord {
			height: stream.height,
			record_count: stream.records.len(),
			tree_edge: stream.tree_edge.clone(),
			synced_at: stream.synced_at,
		};
		let last_sync_filename = self.get_last_sync_filename(key);
		write_replacing(&last_sync_filename, &serde_json::to_vec_pretty(&last_sync)?).await?;

		info!(
			"Saved {} records for {} at height {}",
			stream.records.len(),
			key,
			stream.height
		);
		Ok(())
	}
}

/// In-memory implementation of StreamCacheRepository
#[derive(Debug, Default)]
pub struct InMemoryStreamCacheRepository {
	entries: RwLock<HashMap<String, CachedStream>>,
}

impl InMemoryStreamCacheRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

#[async_trait::async_trait]
impl StreamCacheRepository for InMemoryStreamCacheRepository {
	async fn load(&self, key: &str) -> Result<Option<CachedStream>, CacheError> {
		Ok(self.entries.read().get(key).cloned())
	}

	async fn save(&self, key: &str, stream: &CachedStream) -> Result<(), CacheError> {
		self.entries.write().insert(key.to_string(), stream.clone());
		Ok(())
	}
}
