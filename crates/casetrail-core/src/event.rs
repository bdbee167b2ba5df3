//! Audit event model
//!
//! [`EventRecord`] is the immutable unit of the application history log.
//! Callers build a [`NewEvent`], the storage layer assigns the id and the
//! write timestamp, and the resulting record is never mutated or deleted.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EventError;
use crate::ids::{ApplicationId, CaseworkerId, EventId};

/// The fixed enumeration of auditable actions on an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Updated,
    Assigned,
    Unassigned,
    StatusChanged,
    NoteAdded,
}

impl EventType {
    /// Every variant paired with its canonical wire name
    pub const VARIANTS: [(&'static str, EventType); 6] = [
        ("CREATED", EventType::Created),
        ("UPDATED", EventType::Updated),
        ("ASSIGNED", EventType::Assigned),
        ("UNASSIGNED", EventType::Unassigned),
        ("STATUS_CHANGED", EventType::StatusChanged),
        ("NOTE_ADDED", EventType::NoteAdded),
    ];

    /// Canonical name used in sort keys and stored attributes
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::Updated => "UPDATED",
            EventType::Assigned => "ASSIGNED",
            EventType::Unassigned => "UNASSIGNED",
            EventType::StatusChanged => "STATUS_CHANGED",
            EventType::NoteAdded => "NOTE_ADDED",
        }
    }

    /// Parse an event type from its wire name
    ///
    /// Normalization is trim plus ASCII case-fold; anything else is rejected.
    pub fn parse(input: &str) -> Result<Self, EventError> {
        let normalized = input.trim().to_ascii_uppercase();
        Self::VARIANTS
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, variant)| *variant)
            .ok_or_else(|| EventError::UnknownEventType(input.to_string()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Reference to an event payload stored outside the metadata record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobUri(String);

impl BlobUri {
    /// Wrap a pre-formed reference URI
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// The URI as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event payload: inline for small bodies, a blob reference otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventData {
    /// Small payload carried directly in the metadata record
    Inline(serde_json::Value),
    /// Oversized payload offloaded to the blob store
    Blob(BlobUri),
}

impl EventData {
    /// Whether this payload lives in the blob store
    pub fn is_blob(&self) -> bool {
        matches!(self, EventData::Blob(_))
    }

    /// The blob reference, if the payload was offloaded
    pub fn blob_uri(&self) -> Option<&BlobUri> {
        match self {
            EventData::Blob(uri) => Some(uri),
            EventData::Inline(_) => None,
        }
    }
}

impl Default for EventData {
    fn default() -> Self {
        EventData::Inline(serde_json::Value::Null)
    }
}

/// One immutable audit-log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Opaque identifier, assigned at append time, never reused
    pub id: EventId,
    /// The application this event describes
    pub application_id: ApplicationId,
    /// The acting caseworker; absent for system-generated events
    pub caseworker_id: Option<CaseworkerId>,
    /// What happened
    pub event_type: EventType,
    /// Write timestamp, assigned by the writer rather than the store
    pub created_at: DateTime<Utc>,
    /// Free-text actor label
    pub created_by: String,
    /// Inline payload or blob reference
    pub data: EventData,
}

impl EventRecord {
    /// The total-order key for one application's history
    ///
    /// Ascending `created_at`, ties broken by id. Event ids are ulids, so
    /// the tie-break is stable across backends.
    pub fn sort_key(&self) -> (DateTime<Utc>, EventId) {
        (self.created_at, self.id)
    }
}

/// Input for an append, before the store fills in id and timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Pre-assigned id, e.g. when a blob was written under it first
    pub id: Option<EventId>,
    /// The application the event describes; mandatory
    pub application_id: ApplicationId,
    /// The acting caseworker, if any
    pub caseworker_id: Option<CaseworkerId>,
    /// What happened
    pub event_type: EventType,
    /// Explicit write timestamp; defaults to now at append
    pub created_at: Option<DateTime<Utc>>,
    /// Free-text actor label
    pub created_by: String,
    /// Payload, inline or already offloaded
    pub data: EventData,
}

impl NewEvent {
    /// Create an event input with the mandatory fields
    pub fn new(application_id: impl Into<ApplicationId>, event_type: EventType) -> Self {
        Self {
            id: None,
            application_id: application_id.into(),
            caseworker_id: None,
            event_type,
            created_at: None,
            created_by: String::new(),
            data: EventData::default(),
        }
    }

    /// Set the acting caseworker
    pub fn with_caseworker(mut self, caseworker_id: impl Into<CaseworkerId>) -> Self {
        self.caseworker_id = Some(caseworker_id.into());
        self
    }

    /// Set the actor label
    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    /// Set an explicit write timestamp
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Set an inline payload
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.data = EventData::Inline(payload);
        self
    }

    /// Check invariants that must hold before any storage call
    pub fn validate(&self) -> Result<(), EventError> {
        if self.application_id.is_blank() {
            return Err(EventError::EmptyApplicationId);
        }
        Ok(())
    }

    /// Finalize into a record, filling in id and timestamp where absent
    ///
    /// The timestamp is truncated to millisecond precision, the granularity
    /// the stores persist, so the returned record equals what a later query
    /// reads back.
    pub fn assign(self) -> EventRecord {
        let created_at = self.created_at.unwrap_or_else(Utc::now);
        EventRecord {
            id: self.id.unwrap_or_else(EventId::generate),
            application_id: self.application_id,
            caseworker_id: self.caseworker_id,
            event_type: self.event_type,
            created_at: truncate_to_millis(created_at),
            created_by: self.created_by,
            data: self.data,
        }
    }
}

/// Drop sub-millisecond precision; stored timestamps carry milliseconds only
fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}
