//! Identifier newtypes
//!
//! Opaque identifiers for events, applications, and caseworkers. Event ids
//! are ulids, so their lexicographic order doubles as the tie-break order
//! for records sharing a timestamp.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::EventError;

/// Unique identifier for an event record
///
/// Assigned once at append time and never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a fresh event id
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Parse an id from its canonical string form
    pub fn parse(input: &str) -> Result<Self, EventError> {
        Ulid::from_string(input)
            .map(Self)
            .map_err(|e| EventError::InvalidEventId(e.to_string()))
    }

    /// The underlying ulid
    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

/// Identifier of the application an event describes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(String);

impl ApplicationId {
    /// Create an application id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty or whitespace-only
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for ApplicationId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of the caseworker who performed an action
///
/// Absent on system-generated events.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseworkerId(String);

impl CaseworkerId {
    /// Create a caseworker id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CaseworkerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
