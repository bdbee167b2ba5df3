//! Blob offload gateway
//!
//! File-backed object store keyed by `application/{applicationId}/{eventId}.json`.
//! Writes are atomic (temp file plus rename); reads are fresh on every call
//! with a bounded retry on transient failures only.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use casetrail_core::{ApplicationId, BlobUri, EventId};

use crate::error::StorageError;

/// Configuration for the blob gateway
#[derive(Debug, Clone)]
pub struct BlobGatewayConfig {
    /// Base directory backing the bucket
    pub base_dir: PathBuf,
    /// Bucket name used in reference URIs
    pub bucket: String,
    /// Maximum payload size (bytes)
    pub max_blob_size: u64,
    /// Extra attempts for idempotent reads hitting transient failures
    pub read_retries: u32,
    /// Base delay between read retries
    pub retry_backoff: Duration,
}

impl Default for BlobGatewayConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/blobs"),
            bucket: String::from("casetrail-events"),
            max_blob_size: 100 * 1024 * 1024, // 100MB
            read_retries: 2,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// Durable object storage for offloaded event payloads
pub struct BlobOffloadGateway {
    config: BlobGatewayConfig,
}

impl BlobOffloadGateway {
    /// Create a new gateway, ensuring the bucket directory exists
    pub async fn new(config: BlobGatewayConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        info!(path = %config.base_dir.display(), bucket = %config.bucket, "Blob gateway initialized");

        Ok(Self { config })
    }

    /// The deterministic reference URI for one event's payload
    pub fn uri_for(&self, application_id: &ApplicationId, event_id: &EventId) -> BlobUri {
        BlobUri::new(format!(
            "blob://{}/{}",
            self.config.bucket,
            object_key(application_id, event_id)
        ))
    }

    /// Store a payload and return its reference URI
    #[instrument(skip(self, payload), fields(application = %application_id, size = payload.len()))]
    pub async fn store(
        &self,
        application_id: &ApplicationId,
        event_id: &EventId,
        payload: &[u8],
    ) -> Result<BlobUri, StorageError> {
        if payload.len() as u64 > self.config.max_blob_size {
            return Err(StorageError::CapacityExceeded);
        }

        let uri = self.uri_for(application_id, event_id);
        let path = self.object_path(&uri)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }

        // Write atomically (write to temp, then rename)
        let temp_path = path.with_extension("tmp");

        let mut file = File::create(&temp_path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        file.write_all(payload)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        file.sync_all()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;

        debug!(uri = %uri, "Stored blob");
        Ok(uri)
    }

    /// Load a payload by reference
    ///
    /// Each call is a fresh read. Transient failures are retried up to the
    /// configured attempt count; a missing object fails immediately with
    /// [`StorageError::BlobNotFound`].
    #[instrument(skip(self), fields(uri = %uri))]
    pub async fn retrieve(&self, uri: &BlobUri) -> Result<Bytes, StorageError> {
        let mut attempt = 0u32;
        loop {
            match self.read_object(uri).await {
                Ok(data) => return Ok(data),
                Err(err) if err.is_retryable() && attempt < self.config.read_retries => {
                    attempt += 1;
                    warn!(attempt, error = %err, "Transient blob read failure, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Check whether a reference resolves to a stored object
    pub async fn exists(&self, uri: &BlobUri) -> Result<bool, StorageError> {
        let path = self.object_path(uri)?;
        Ok(fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?)
    }

    /// Delete an object (maintenance only, never reachable through appends)
    #[instrument(skip(self), fields(uri = %uri))]
    pub async fn delete(&self, uri: &BlobUri) -> Result<bool, StorageError> {
        let path = self.object_path(uri)?;

        match fs::remove_file(&path).await {
            Ok(_) => {
                debug!("Deleted blob");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }

    /// List every stored reference for one application
    ///
    /// Building block for external orphan reconciliation.
    pub async fn list_for_application(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Vec<BlobUri>, StorageError> {
        let dir = self
            .config
            .base_dir
            .join("application")
            .join(application_id.as_str());

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        let mut uris = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stem) = name.strip_suffix(".json")
                && let Ok(event_id) = EventId::parse(stem)
            {
                uris.push(self.uri_for(application_id, &event_id));
            }
        }

        uris.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(uris)
    }

    async fn read_object(&self, uri: &BlobUri) -> Result<Bytes, StorageError> {
        let path = self.object_path(uri)?;

        let mut file = File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::blob_not_found(uri.as_str())
            } else {
                StorageError::from(e)
            }
        })?;

        let mut data = Vec::new();
        file.read_to_end(&mut data).await.map_err(StorageError::from)?;

        Ok(Bytes::from(data))
    }

    /// Resolve a reference URI to its on-disk path
    ///
    /// Rejects foreign buckets and any key that escapes the bucket root.
    fn object_path(&self, uri: &BlobUri) -> Result<PathBuf, StorageError> {
        let prefix = format!("blob://{}/", self.config.bucket);
        let key = uri.as_str().strip_prefix(&prefix).ok_or_else(|| {
            StorageError::validation(format!(
                "reference {uri} does not belong to bucket {}",
                self.config.bucket
            ))
        })?;

        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "..") {
            return Err(StorageError::validation(format!("malformed blob key: {key}")));
        }

        Ok(self.config.base_dir.join(key))
    }
}

/// Object key convention: `application/{applicationId}/{eventId}.json`
fn object_key(application_id: &ApplicationId, event_id: &EventId) -> String {
    format!("application/{application_id}/{event_id}.json")
}
