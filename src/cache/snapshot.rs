//! Remote static snapshot tier.
//!
//! A snapshot is `{static_base}/{key}.json.zip`: a zip archive with the single entry
//! `{key}.json`, a JSON array of event records. When the stream is configured with a digest the
//! compressed bytes must hash to it (`sha384-` followed by the base64 SHA-384) or the snapshot is
//! rejected whole.

use base64::{Engine as _, engine::general_purpose};
use sha2::{Digest, Sha384};
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::{debug, info};

use crate::sync::records::EventRecord;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Snapshot server answered {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Snapshot archive is unreadable: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Snapshot archive has no entry {0}")]
    MissingEntry(String),

    #[error("Snapshot digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Snapshot entry is unreadable: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot entry is not a record list: {0}")]
    Json(#[from] serde_json::Error),
}

/// `sha384-<base64>` over `bytes`.
pub fn snapshot_digest(bytes: &[u8]) -> String {
    let digest = Sha384::digest(bytes);
    format!("sha384-{}", general_purpose::STANDARD.encode(digest))
}

/// Check the digest, unpack `{key}.json` and parse it.
pub fn decode_snapshot(
    key: &str,
    bytes: &[u8],
    expected_digest: Option<&str>,
) -> Result<Vec<EventRecord>, SnapshotError> {
    if let Some(expected) = expected_digest {
        let actual = snapshot_digest(bytes);
        if actual != expected {
            return Err(SnapshotError::DigestMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    let entry_name = format!("{key}.json");
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = match archive.by_name(&entry_name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(SnapshotError::MissingEntry(entry_name));
        }
        Err(e) => return Err(e.into()),
    };

    let mut json = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Downloads stream snapshots from a static file host.
#[derive(Debug, Clone)]
pub struct SnapshotLoader {
    http_client: reqwest::Client,
    static_base: String,
}

impl SnapshotLoader {
    pub fn new(static_base: impl Into<String>, timeout: Duration) -> Result<Self, SnapshotError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            static_base: static_base.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn snapshot_url(&self, key: &str) -> String {
        format!("{}/{}.json.zip", self.static_base, key)
    }

    /// Fetch and decode the snapshot for `key`. `Ok(None)` when the host has none.
    pub async fn load(
        &self,
        key: &str,
        expected_digest: Option<&str>,
    ) -> Result<Option<Vec<EventRecord>>, SnapshotError> {
        let url = self.snapshot_url(key);
        debug!("Downloading snapshot {}", url);

        let response = self.http_client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            info!("No snapshot published for {}", key);
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SnapshotError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let bytes = response.bytes().await?;
        let records = decode_snapshot(key, &bytes, expected_digest)?;
        info!(
            "Loaded {} snapshot records for {} ({} bytes)",
            records.len(),
            key,
            bytes.len()
        );
        Ok(Some(records))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::snapshot_archive;
    use super::*;
    use crate::sync::records::fixtures::deposit;

    const KEY: &str = "deposits_1_eth_0.1";

    #[test]
    fn decodes_archive_with_matching_digest() {
        let records = vec![deposit(100, 0, 0), deposit(105, 0, 1)];
        let archive = snapshot_archive(KEY, &records);
        let digest = snapshot_digest(&archive);
        assert!(digest.starts_with("sha384-"));

        let decoded = decode_snapshot(KEY, &archive, Some(&digest)).unwrap();
        assert_eq!(decoded, records);
        // the digest is optional
        assert_eq!(decode_snapshot(KEY, &archive, None).unwrap(), records);
    }

    #[test]
    fn rejects_digest_mismatch() {
        let archive = snapshot_archive(KEY, &[deposit(100, 0, 0)]);
        let other = snapshot_digest(b"something else");
        let err = decode_snapshot(KEY, &archive, Some(&other)).unwrap_err();
        assert!(matches!(err, SnapshotError::DigestMismatch { .. }));
    }

    #[test]
    fn requires_entry_named_after_key() {
        let archive = snapshot_archive("withdrawals_1_eth_0.1", &[]);
        let err = decode_snapshot(KEY, &archive, None).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingEntry(name) if name == "deposits_1_eth_0.1.json"));
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = decode_snapshot(KEY, b"not a zip", None).unwrap_err();
        assert!(matches!(err, SnapshotError::Zip(_)));
    }

    #[test]
    fn snapshot_url_trims_trailing_slash() {
        let loader = SnapshotLoader::new("https://static.example/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            loader.snapshot_url(KEY),
            "https://static.example/deposits_1_eth_0.1.json.zip"
        );
    }
}
