//! # Casetrail Storage
//!
//! Dual-backend storage engine for the casetrail domain event history.
//!
//! This crate provides the append and query operations over
//! [`EventRecord`]s, served from either of two structurally different
//! engines behind one contract:
//!
//! - **EventStore trait**: append-only log with filterable, chronologically
//!   ordered queries
//! - **RelationalEventStore**: row-oriented SQLite backend built from
//!   composable equality predicates
//! - **WideColumnEventStore**: single-table key-value backend with derived
//!   partition/sort keys and two secondary indexes
//! - **BlobOffloadGateway**: durable object storage for oversized payloads
//! - **EventQueryService**: the façade callers use; holds exactly one
//!   configured backend for the process lifetime
//!
//! ## Example
//!
//! ```rust,ignore
//! use casetrail_core::{EventType, NewEvent};
//! use casetrail_storage::{EventQuery, EventQueryService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let service = EventQueryService::new(store, gateway);
//!
//!     let event = NewEvent::new("app-1", EventType::Created)
//!         .with_created_by("intake");
//!     service.append(event).await.unwrap();
//!
//!     let result = service
//!         .query(EventQuery::for_application("app-1"))
//!         .await
//!         .unwrap();
//!     assert_eq!(result.events.len(), 1);
//! }
//! ```

pub mod blobs;
pub mod error;
pub mod keys;
pub mod relational;
pub mod service;
pub mod wide_column;

// Re-exports
pub use blobs::{BlobGatewayConfig, BlobOffloadGateway};
pub use error::StorageError;
pub use keys::{DerivedKeys, derive};
pub use relational::{RelationalEventStore, RelationalStoreConfig};
pub use service::{Backend, EventQueryService, EventStoreConfig, open_store};
pub use wide_column::{WideColumnEventStore, WideColumnStoreConfig};

use async_trait::async_trait;
use casetrail_core::{ApplicationId, CaseworkerId, EventRecord, EventType, NewEvent};

/// Query parameters accepted by every backend
///
/// `application_id` is mandatory; an empty `event_types` collection means no
/// type filter at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    /// The application whose history is requested
    pub application_id: ApplicationId,
    /// Restrict to these event types; empty means unfiltered
    pub event_types: Vec<EventType>,
    /// Restrict to events performed by this caseworker
    pub caseworker_id: Option<CaseworkerId>,
}

impl EventQuery {
    /// Query the full history of one application
    pub fn for_application(application_id: impl Into<ApplicationId>) -> Self {
        Self {
            application_id: application_id.into(),
            event_types: Vec::new(),
            caseworker_id: None,
        }
    }

    /// Restrict to a set of event types
    pub fn with_types(mut self, event_types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types = event_types.into_iter().collect();
        self
    }

    /// Restrict to one caseworker
    pub fn with_caseworker(mut self, caseworker_id: impl Into<CaseworkerId>) -> Self {
        self.caseworker_id = Some(caseworker_id.into());
        self
    }

    /// Reject malformed queries before any storage call
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.application_id.is_blank() {
            return Err(StorageError::validation(
                "query requires a non-empty application id",
            ));
        }
        Ok(())
    }

    /// Whether a record of this type passes the type filter
    pub fn matches_type(&self, event_type: EventType) -> bool {
        self.event_types.is_empty() || self.event_types.contains(&event_type)
    }
}

/// A stored row that failed to decode
///
/// Carried alongside the valid rows so one corrupt record never fails an
/// entire query and is never silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptEntry {
    /// Best-effort identifier of the offending row (event id or physical key)
    pub key: String,
    /// Why decoding failed
    pub message: String,
}

/// Result of a query: decoded events plus any corrupt rows encountered
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Valid records, ascending by `(created_at, id)`
    pub events: Vec<EventRecord>,
    /// Rows that failed to decode, surfaced per record
    pub corrupt: Vec<CorruptEntry>,
}

/// Append and query operations over the event history
///
/// Both backends implement this contract identically: appends are durable
/// single-item writes, queries return ascending `created_at` order, and an
/// unknown application yields an empty list rather than an error. Every
/// operation is an independent, stateless request; callers bound it with
/// `tokio::time::timeout` and abort it by dropping the future.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event, assigning id and timestamp where absent
    ///
    /// Returns the record as stored. Records are never mutated or deleted
    /// after this call succeeds.
    async fn append(&self, event: NewEvent) -> Result<EventRecord, StorageError>;

    /// Query one application's history
    ///
    /// The result is ascending by `(created_at, id)` regardless of which
    /// physical index served the request.
    async fn query(&self, query: &EventQuery) -> Result<QueryResult, StorageError>;
}

/// Restore the external ordering contract after any physical access path
pub(crate) fn sort_chronologically(events: &mut [EventRecord]) {
    events.sort_by_key(|record| record.sort_key());
}
