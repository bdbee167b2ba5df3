//! Event query service
//!
//! The single entry point collaborators use. Exactly one backend is
//! selected at construction and held for the process lifetime; the two
//! backends are never queried together. The service normalizes query input,
//! offloads oversized payloads before the metadata write, and resolves blob
//! references only when payload content is explicitly requested.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use casetrail_core::{EventData, EventId, EventRecord, NewEvent};

use crate::blobs::BlobOffloadGateway;
use crate::error::StorageError;
use crate::relational::{RelationalEventStore, RelationalStoreConfig};
use crate::wide_column::{WideColumnEventStore, WideColumnStoreConfig};
use crate::{EventQuery, EventStore, QueryResult};

/// Which storage engine serves the process
///
/// A deployment-time decision, not a per-call choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Relational,
    WideColumn,
}

/// Composition-root configuration for the backend choice
#[derive(Debug, Clone, Default)]
pub struct EventStoreConfig {
    /// The engine to use for the process lifetime
    pub backend: Backend,
    /// Settings for the relational engine
    pub relational: RelationalStoreConfig,
    /// Settings for the wide-column engine
    pub wide_column: WideColumnStoreConfig,
}

impl EventStoreConfig {
    /// Relational backend at the given path
    pub fn relational(db_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Relational,
            relational: RelationalStoreConfig {
                db_path: Some(db_path.into()),
            },
            ..Default::default()
        }
    }

    /// Wide-column backend at the given path
    pub fn wide_column(db_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::WideColumn,
            wide_column: WideColumnStoreConfig {
                db_path: db_path.into(),
            },
            ..Default::default()
        }
    }
}

/// Open the configured backend
pub fn open_store(config: &EventStoreConfig) -> Result<Arc<dyn EventStore>, StorageError> {
    Ok(match config.backend {
        Backend::Relational => Arc::new(RelationalEventStore::open(config.relational.clone())?),
        Backend::WideColumn => Arc::new(WideColumnEventStore::open(config.wide_column.clone())?),
    })
}

/// Payloads at or above this serialized size are offloaded to blob storage
pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 4096;

/// Façade over one configured [`EventStore`] plus the blob gateway
pub struct EventQueryService {
    store: Arc<dyn EventStore>,
    blobs: Arc<BlobOffloadGateway>,
    offload_threshold: usize,
}

impl EventQueryService {
    /// Build the service from its collaborators
    pub fn new(store: Arc<dyn EventStore>, blobs: Arc<BlobOffloadGateway>) -> Self {
        Self {
            store,
            blobs,
            offload_threshold: DEFAULT_OFFLOAD_THRESHOLD,
        }
    }

    /// Override the offload threshold (bytes of serialized payload)
    pub fn with_offload_threshold(mut self, threshold: usize) -> Self {
        self.offload_threshold = threshold;
        self
    }

    /// Append one event, offloading an oversized payload first
    ///
    /// The blob write happens before the metadata write, so a metadata
    /// failure leaves at worst an unreferenced orphan. That case surfaces as
    /// [`StorageError::PartialWrite`] naming the orphan; a blob-write
    /// failure propagates as-is since the metadata write never started.
    #[instrument(skip(self, event), fields(application = %event.application_id))]
    pub async fn append(&self, event: NewEvent) -> Result<EventRecord, StorageError> {
        event.validate()?;

        let (event, offloaded) = self.offload_if_oversized(event).await?;

        match self.store.append(event).await {
            Ok(record) => Ok(record),
            Err(err) => match offloaded {
                Some(orphan) => Err(StorageError::PartialWrite {
                    blob_written: true,
                    metadata_written: false,
                    orphan: Some(orphan),
                    source: Box::new(err),
                }),
                None => Err(err),
            },
        }
    }

    /// Query one application's history, ascending by `created_at`
    ///
    /// Blob references in the returned records are left unresolved; call
    /// [`resolve_payload`](Self::resolve_payload) when the content is needed.
    #[instrument(skip(self, query), fields(application = %query.application_id))]
    pub async fn query(&self, query: EventQuery) -> Result<QueryResult, StorageError> {
        query.validate()?;

        let result = self.store.query(&query).await?;
        if !result.corrupt.is_empty() {
            warn!(
                count = result.corrupt.len(),
                "Query returned corrupt records"
            );
        }
        Ok(result)
    }

    /// Fetch a record's payload bytes, resolving a blob reference on demand
    pub async fn resolve_payload(&self, record: &EventRecord) -> Result<Bytes, StorageError> {
        match &record.data {
            EventData::Inline(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            EventData::Blob(uri) => self.blobs.retrieve(uri).await,
        }
    }

    /// The gateway, for maintenance tooling (orphan listing etc.)
    pub fn blobs(&self) -> &BlobOffloadGateway {
        &self.blobs
    }

    /// Route an oversized inline payload through the blob store
    ///
    /// Returns the possibly-rewritten event and the reference written, if
    /// any, so the caller can report a partial write precisely.
    async fn offload_if_oversized(
        &self,
        mut event: NewEvent,
    ) -> Result<(NewEvent, Option<casetrail_core::BlobUri>), StorageError> {
        let EventData::Inline(value) = &event.data else {
            return Ok((event, None));
        };

        let body = serde_json::to_vec(value)?;
        if body.len() < self.offload_threshold {
            return Ok((event, None));
        }

        // The blob key needs the event id, so assign it here rather than in
        // the store
        let event_id = *event.id.get_or_insert_with(EventId::generate);
        let uri = self
            .blobs
            .store(&event.application_id, &event_id, &body)
            .await?;

        debug!(event = %event_id, uri = %uri, size = body.len(), "Offloaded oversized payload");
        event.data = EventData::Blob(uri.clone());
        Ok((event, Some(uri)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blobs::BlobGatewayConfig;
    use async_trait::async_trait;
    use casetrail_core::EventType;
    use tempfile::TempDir;

    async fn create_test_service() -> (EventQueryService, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn EventStore> = Arc::new(RelationalEventStore::in_memory().unwrap());
        let blobs = Arc::new(
            BlobOffloadGateway::new(BlobGatewayConfig {
                base_dir: temp_dir.path().join("blobs"),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        let service = EventQueryService::new(store, blobs).with_offload_threshold(64);
        (service, temp_dir)
    }

    /// Store double whose metadata write always fails
    struct FailingStore;

    #[async_trait]
    impl EventStore for FailingStore {
        async fn append(&self, _event: NewEvent) -> Result<EventRecord, StorageError> {
            Err(StorageError::unavailable("metadata store is down"))
        }

        async fn query(&self, _query: &EventQuery) -> Result<QueryResult, StorageError> {
            Err(StorageError::unavailable("metadata store is down"))
        }
    }

    #[tokio::test]
    async fn test_small_payload_stays_inline() {
        let (service, _temp) = create_test_service().await;

        let record = service
            .append(
                NewEvent::new("app-1", EventType::Created)
                    .with_payload(serde_json::json!({"k": "v"})),
            )
            .await
            .unwrap();
        assert!(!record.data.is_blob());

        let payload = service.resolve_payload(&record).await.unwrap();
        assert_eq!(&payload[..], br#"{"k":"v"}"#);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_offloaded_and_resolvable() {
        let (service, _temp) = create_test_service().await;

        let big = serde_json::json!({"note": "x".repeat(500)});
        let record = service
            .append(NewEvent::new("app-1", EventType::NoteAdded).with_payload(big.clone()))
            .await
            .unwrap();
        assert!(record.data.is_blob());

        // Queries return the reference unresolved
        let result = service
            .query(EventQuery::for_application("app-1"))
            .await
            .unwrap();
        assert!(result.events[0].data.is_blob());

        // Content comes back only on explicit request
        let payload = service.resolve_payload(&record).await.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(decoded, big);
    }

    #[tokio::test]
    async fn test_metadata_failure_after_blob_write_is_partial() {
        let temp_dir = TempDir::new().unwrap();
        let blobs = Arc::new(
            BlobOffloadGateway::new(BlobGatewayConfig {
                base_dir: temp_dir.path().join("blobs"),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        let service =
            EventQueryService::new(Arc::new(FailingStore), blobs).with_offload_threshold(64);

        let big = serde_json::json!({"note": "x".repeat(500)});
        let err = service
            .append(NewEvent::new("app-1", EventType::NoteAdded).with_payload(big))
            .await
            .unwrap_err();

        match err {
            StorageError::PartialWrite {
                blob_written,
                metadata_written,
                orphan,
                ..
            } => {
                assert!(blob_written);
                assert!(!metadata_written);
                // The orphan blob really exists, ready for reconciliation
                let orphan = orphan.unwrap();
                assert!(service.blobs().exists(&orphan).await.unwrap());
            }
            other => panic!("expected PartialWrite, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_small_payload_failure_is_not_partial() {
        let temp_dir = TempDir::new().unwrap();
        let blobs = Arc::new(
            BlobOffloadGateway::new(BlobGatewayConfig {
                base_dir: temp_dir.path().join("blobs"),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        let service = EventQueryService::new(Arc::new(FailingStore), blobs);

        let err = service
            .append(NewEvent::new("app-1", EventType::Created))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_query_rejects_blank_application() {
        let (service, _temp) = create_test_service().await;
        let err = service
            .query(EventQuery::for_application(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[tokio::test]
    async fn test_open_store_selects_backend() {
        let temp_dir = TempDir::new().unwrap();

        let store = open_store(&EventStoreConfig::relational(temp_dir.path().join("e.db")))
            .unwrap();
        store
            .append(NewEvent::new("app-1", EventType::Created))
            .await
            .unwrap();

        let store = open_store(&EventStoreConfig::wide_column(temp_dir.path().join("e.redb")))
            .unwrap();
        store
            .append(NewEvent::new("app-1", EventType::Created))
            .await
            .unwrap();
    }
}
