//! Relational event store
//!
//! Row-oriented SQLite backend. Queries build a conjunction of equality
//! predicates (application id always, type and caseworker filters only when
//! supplied) and re-sort the materialized rows in memory by
//! `(created_at, id)`; the engine's natural row order is not relied upon.
//! A pathologically large single-application history is therefore fully
//! materialized before sorting; streaming access belongs above this contract.

use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use casetrail_core::{EventData, EventRecord, EventType, NewEvent};

use crate::error::StorageError;
use crate::keys::format_sort_timestamp;
use crate::{CorruptEntry, EventQuery, EventStore, QueryResult, sort_chronologically};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    application_id TEXT NOT NULL,
    caseworker_id TEXT,
    type TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    created_by TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_application ON events(application_id);
CREATE INDEX IF NOT EXISTS idx_events_caseworker ON events(caseworker_id);
";

/// Configuration for the relational backend
#[derive(Debug, Clone, Default)]
pub struct RelationalStoreConfig {
    /// Database file; `None` opens an in-memory database for tests
    pub db_path: Option<PathBuf>,
}

/// SQLite-backed implementation of [`EventStore`]
pub struct RelationalEventStore {
    conn: Mutex<Connection>,
}

impl RelationalEventStore {
    /// Open or create the database and ensure the schema exists
    #[instrument(skip(config))]
    pub fn open(config: RelationalStoreConfig) -> Result<Self, StorageError> {
        let conn = match &config.db_path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
                }
                Connection::open(path).map_err(map_sqlite_err)?
            }
            None => Connection::open_in_memory().map_err(map_sqlite_err)?,
        };

        conn.execute_batch(SCHEMA).map_err(map_sqlite_err)?;

        info!(
            path = %config.db_path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| ":memory:".into()),
            "Opened relational event store"
        );

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and simulation
    pub fn in_memory() -> Result<Self, StorageError> {
        Self::open(RelationalStoreConfig::default())
    }
}

#[async_trait]
impl EventStore for RelationalEventStore {
    #[instrument(skip(self, event), fields(application = %event.application_id))]
    async fn append(&self, event: NewEvent) -> Result<EventRecord, StorageError> {
        event.validate()?;
        let record = event.assign();

        let data = serde_json::to_string(&record.data)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO events (id, application_id, caseworker_id, type, data, created_at, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.id.to_string(),
                record.application_id.as_str(),
                record.caseworker_id.as_ref().map(|cw| cw.as_str()),
                record.event_type.as_str(),
                data,
                format_sort_timestamp(record.created_at),
                record.created_by,
            ],
        )
        .map_err(map_sqlite_err)?;

        debug!(event = %record.id, "Appended event");
        Ok(record)
    }

    #[instrument(skip(self, query), fields(application = %query.application_id))]
    async fn query(&self, query: &EventQuery) -> Result<QueryResult, StorageError> {
        query.validate()?;

        let mut sql = String::from(
            "SELECT id, application_id, caseworker_id, type, data, created_at, created_by \
             FROM events WHERE application_id = ?",
        );
        let mut params: Vec<rusqlite::types::Value> = Vec::new();
        params.push(query.application_id.as_str().to_owned().into());

        if let Some(caseworker) = &query.caseworker_id {
            sql.push_str(" AND caseworker_id = ?");
            params.push(caseworker.as_str().to_owned().into());
        }
        if !query.event_types.is_empty() {
            let placeholders = vec!["?"; query.event_types.len()].join(", ");
            sql.push_str(&format!(" AND type IN ({placeholders})"));
            for event_type in &query.event_types {
                params.push(event_type.as_str().to_owned().into());
            }
        }

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params))
            .map_err(map_sqlite_err)?;

        let mut result = QueryResult::default();
        while let Some(row) = rows.next().map_err(map_sqlite_err)? {
            match decode_row(row) {
                Ok(record) => result.events.push(record),
                Err((key, message)) => result.corrupt.push(CorruptEntry { key, message }),
            }
        }

        sort_chronologically(&mut result.events);
        Ok(result)
    }
}

/// Decode one row; returns `(row key, reason)` so one corrupt row is
/// reported without failing the whole query
fn decode_row(row: &rusqlite::Row<'_>) -> Result<EventRecord, (String, String)> {
    let id: String = row
        .get(0)
        .map_err(|e| (String::from("<unknown>"), e.to_string()))?;
    let fail = |message: String| (id.clone(), message);

    let application_id: String = row.get(1).map_err(|e| fail(e.to_string()))?;
    let caseworker_id: Option<String> = row.get(2).map_err(|e| fail(e.to_string()))?;
    let event_type: String = row.get(3).map_err(|e| fail(e.to_string()))?;
    let data: String = row.get(4).map_err(|e| fail(e.to_string()))?;
    let created_at: String = row.get(5).map_err(|e| fail(e.to_string()))?;
    let created_by: String = row.get(6).map_err(|e| fail(e.to_string()))?;

    let event_id = casetrail_core::EventId::parse(&id).map_err(|e| fail(e.to_string()))?;
    let event_type = EventType::parse(&event_type).map_err(|e| fail(e.to_string()))?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| fail(e.to_string()))?;
    let data: EventData = serde_json::from_str(&data).map_err(|e| fail(e.to_string()))?;

    Ok(EventRecord {
        id: event_id,
        application_id: application_id.as_str().into(),
        caseworker_id: caseworker_id.map(|cw| cw.as_str().into()),
        event_type,
        created_at,
        created_by,
        data,
    })
}

/// Map sqlite failures, classifying lock contention as retryable
fn map_sqlite_err(err: rusqlite::Error) -> StorageError {
    use rusqlite::ErrorCode;
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            StorageError::unavailable(err.to_string())
        }
        _ => StorageError::Database(err.to_string()),
    }
}
