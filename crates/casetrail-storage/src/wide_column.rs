//! Wide-column event store
//!
//! Single-table key-value backend over redb. Items live under a composite
//! physical key derived from the record ([`crate::keys`]); two extra tables
//! mirror the secondary indexes, each carrying a full copy of the item so a
//! lookup never needs a second fetch.
//!
//! The access path is chosen by which filters the query supplies:
//! a caseworker filter routes through index 1, exactly one event type
//! narrows the primary sort-key range to that type's prefix, and anything
//! else reads index 2, which recovers pure chronological order for the
//! partition, filtering client-side. Every path re-sorts to
//! `(created_at, id)` before returning, since no physical order is the
//! external ordering contract.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use casetrail_core::{BlobUri, EventData, EventId, EventRecord, EventType, NewEvent};

use crate::error::StorageError;
use crate::keys::{DerivedKeys, derive, format_sort_timestamp};
use crate::{CorruptEntry, EventQuery, EventStore, QueryResult, sort_chronologically};

// Primary table: key (pk, sk, id), value = serialized item
const EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events");

// Secondary index 1: key (gs1pk, gs1sk, id); records without a caseworker
// have no entry here
const EVENTS_BY_CASEWORKER: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("events_by_caseworker");

// Secondary index 2: key (gs2pk, gs2sk, id), pure chronological order
const EVENTS_BY_TIME: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events_by_time");

/// Configuration for the wide-column backend
#[derive(Debug, Clone)]
pub struct WideColumnStoreConfig {
    /// Path to the database file
    pub db_path: PathBuf,
}

impl Default for WideColumnStoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/casetrail.redb"),
        }
    }
}

/// The stored item: derived keys plus the plain attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredItem {
    pk: String,
    sk: String,
    gs1pk: Option<String>,
    gs1sk: Option<String>,
    gs2pk: String,
    gs2sk: String,
    id: String,
    application_id: String,
    caseworker_id: Option<String>,
    event_type: String,
    created_at: String,
    created_by: String,
    /// Inline payload body, JSON text
    payload_json: Option<String>,
    /// Reference to an offloaded payload
    blob_uri: Option<String>,
}

impl StoredItem {
    fn from_record(record: &EventRecord, keys: &DerivedKeys) -> Result<Self, StorageError> {
        let (payload_json, blob_uri) = match &record.data {
            EventData::Inline(value) => (Some(serde_json::to_string(value)?), None),
            EventData::Blob(uri) => (None, Some(uri.as_str().to_owned())),
        };

        Ok(Self {
            pk: keys.pk.clone(),
            sk: keys.sk.clone(),
            gs1pk: keys.gs1pk.clone(),
            gs1sk: keys.gs1sk.clone(),
            gs2pk: keys.gs2pk.clone(),
            gs2sk: keys.gs2sk.clone(),
            id: record.id.to_string(),
            application_id: record.application_id.as_str().to_owned(),
            caseworker_id: record
                .caseworker_id
                .as_ref()
                .map(|cw| cw.as_str().to_owned()),
            event_type: record.event_type.as_str().to_owned(),
            created_at: format_sort_timestamp(record.created_at),
            created_by: record.created_by.clone(),
            payload_json,
            blob_uri,
        })
    }

    fn into_record(self) -> Result<EventRecord, StorageError> {
        let data = match (self.payload_json, self.blob_uri) {
            (_, Some(uri)) => EventData::Blob(BlobUri::new(uri)),
            (Some(json), None) => EventData::Inline(serde_json::from_str(&json)?),
            (None, None) => EventData::default(),
        };

        Ok(EventRecord {
            id: EventId::parse(&self.id)?,
            application_id: self.application_id.as_str().into(),
            caseworker_id: self.caseworker_id.map(|cw| cw.as_str().into()),
            event_type: EventType::parse(&self.event_type)?,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| StorageError::Deserialization(e.to_string()))?,
            created_by: self.created_by,
            data,
        })
    }
}

/// redb-backed implementation of [`EventStore`]
pub struct WideColumnEventStore {
    db: Arc<Database>,
}

impl WideColumnEventStore {
    /// Open or create the database and initialize all tables
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: WideColumnStoreConfig) -> Result<Self, StorageError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }

        let db = Database::create(&config.db_path)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        info!("Opened wide-column event store");

        let store = Self { db: Arc::new(db) };
        store.init_tables()?;
        Ok(store)
    }

    /// Create tables if they don't exist
    fn init_tables(&self) -> Result<(), StorageError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        write_txn
            .open_table(EVENTS)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn
            .open_table(EVENTS_BY_CASEWORKER)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        write_txn
            .open_table(EVENTS_BY_TIME)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        write_txn
            .commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        debug!("Initialized wide-column tables");
        Ok(())
    }

    /// Insert one item into the primary table and both indexes atomically
    fn put_item(&self, keys: &DerivedKeys, item: &StoredItem) -> Result<(), StorageError> {
        let value =
            postcard::to_allocvec(item).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        {
            let mut events = write_txn
                .open_table(EVENTS)
                .map_err(|e| StorageError::Database(e.to_string()))?;
            events
                .insert(
                    composite_key(&[&keys.pk, &keys.sk, &item.id]).as_slice(),
                    value.as_slice(),
                )
                .map_err(|e| StorageError::Database(e.to_string()))?;

            if let (Some(gs1pk), Some(gs1sk)) = (&keys.gs1pk, &keys.gs1sk) {
                let mut by_caseworker = write_txn
                    .open_table(EVENTS_BY_CASEWORKER)
                    .map_err(|e| StorageError::Database(e.to_string()))?;
                by_caseworker
                    .insert(
                        composite_key(&[gs1pk, gs1sk, &item.id]).as_slice(),
                        value.as_slice(),
                    )
                    .map_err(|e| StorageError::Database(e.to_string()))?;
            }

            let mut by_time = write_txn
                .open_table(EVENTS_BY_TIME)
                .map_err(|e| StorageError::Database(e.to_string()))?;
            by_time
                .insert(
                    composite_key(&[&keys.gs2pk, &keys.gs2sk, &item.id]).as_slice(),
                    value.as_slice(),
                )
                .map_err(|e| StorageError::Database(e.to_string()))?;
        }

        write_txn
            .commit()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(())
    }

    /// Collect all items under a key prefix
    fn scan_prefix(
        &self,
        table: TableDefinition<&[u8], &[u8]>,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let table = read_txn
            .open_table(table)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        let mut results = Vec::new();

        // Range over all keys >= prefix, stopping past the prefix
        let range = table
            .range(prefix..)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        for entry in range {
            let (key, value) = entry.map_err(|e| StorageError::Database(e.to_string()))?;
            let key_bytes = key.value();

            if !key_bytes.starts_with(prefix) {
                break;
            }

            results.push((key_bytes.to_vec(), value.value().to_vec()));
        }

        Ok(results)
    }

    /// Decode scanned items into a query result, applying the type filter
    fn collect(
        &self,
        raw: Vec<(Vec<u8>, Vec<u8>)>,
        query: &EventQuery,
    ) -> QueryResult {
        let mut result = QueryResult::default();
        for (key, value) in raw {
            let decoded = postcard::from_bytes::<StoredItem>(&value)
                .map_err(StorageError::from)
                .and_then(StoredItem::into_record);
            match decoded {
                Ok(record) if query.matches_type(record.event_type) => {
                    result.events.push(record);
                }
                Ok(_) => {}
                Err(err) => result.corrupt.push(CorruptEntry {
                    key: String::from_utf8_lossy(&key).into_owned(),
                    message: err.to_string(),
                }),
            }
        }

        sort_chronologically(&mut result.events);
        result
    }
}

#[async_trait]
impl EventStore for WideColumnEventStore {
    #[instrument(skip(self, event), fields(application = %event.application_id))]
    async fn append(&self, event: NewEvent) -> Result<EventRecord, StorageError> {
        event.validate()?;
        let record = event.assign();

        let keys = derive(&record)?;
        let item = StoredItem::from_record(&record, &keys)?;
        self.put_item(&keys, &item)?;

        debug!(event = %record.id, "Appended event");
        Ok(record)
    }

    #[instrument(skip(self, query), fields(application = %query.application_id))]
    async fn query(&self, query: &EventQuery) -> Result<QueryResult, StorageError> {
        query.validate()?;

        let partition = format!(
            "{}{}",
            crate::keys::APPLICATION_PREFIX,
            query.application_id
        );

        let raw = if let Some(caseworker) = &query.caseworker_id {
            // Index 1 groups a caseworker's events by application; the type
            // filter is applied client-side on the returned set
            let gs1pk = format!("{}{}", crate::keys::CASEWORKER_PREFIX, caseworker);
            let prefix = composite_prefix(&[&gs1pk, &partition]);
            self.scan_prefix(EVENTS_BY_CASEWORKER, &prefix)?
        } else if let [only] = query.event_types.as_slice() {
            // Exactly one type: narrow the primary sort-key range to that
            // type's prefix
            let mut prefix = composite_prefix(&[&partition]);
            prefix.extend_from_slice(only.as_str().as_bytes());
            self.scan_prefix(EVENTS, &prefix)?
        } else {
            // No filter, or several types: index 2 recovers chronological
            // order for the partition; type filtering happens client-side
            let prefix = composite_prefix(&[&partition]);
            self.scan_prefix(EVENTS_BY_TIME, &prefix)?
        };

        Ok(self.collect(raw, query))
    }
}

/// Join key components with a NUL separator
fn composite_key(parts: &[&str]) -> Vec<u8> {
    let mut key = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(0);
        }
        key.extend_from_slice(part.as_bytes());
    }
    key
}

/// A composite key prefix: complete components followed by a separator
fn composite_prefix(parts: &[&str]) -> Vec<u8> {
    let mut prefix = composite_key(parts);
    prefix.push(0);
    prefix
}
