//! Key derivation for the wide-column backend
//!
//! One physical table serves three access patterns, so every record fans out
//! into a primary key pair plus two secondary-index key pairs:
//!
//! - primary: partition `application#<app>`, sort `<TYPE><rfc3339>`. Serves
//!   range scans of one event type for one application.
//! - index 1: partition `CASEWORKER#<cw>`, sort = primary partition key.
//!   A caseworker's events grouped by application; records without a
//!   caseworker get no entry here.
//! - index 2: partition = primary partition key, sort `<rfc3339>`. Pure
//!   chronological order per application, which the type-prefixed primary
//!   sort key cannot provide.
//!
//! Derivation is a pure function of the record's fields and fails only on an
//! empty application id, which callers are expected to have rejected already.

use chrono::{DateTime, SecondsFormat, Utc};

use casetrail_core::EventRecord;

use crate::error::StorageError;

/// Prefix of the primary partition key
pub const APPLICATION_PREFIX: &str = "application#";

/// Prefix of the secondary index 1 partition key
pub const CASEWORKER_PREFIX: &str = "CASEWORKER#";

/// The full key set for one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedKeys {
    /// Primary partition key: `application#<applicationId>`
    pub pk: String,
    /// Primary sort key: event type followed by the RFC 3339 timestamp
    pub sk: String,
    /// Index 1 partition key: `CASEWORKER#<caseworkerId>`, absent without one
    pub gs1pk: Option<String>,
    /// Index 1 sort key: the primary partition key
    pub gs1sk: Option<String>,
    /// Index 2 partition key: the primary partition key
    pub gs2pk: String,
    /// Index 2 sort key: the RFC 3339 timestamp alone
    pub gs2sk: String,
}

/// Compute the full key set for a record
pub fn derive(record: &EventRecord) -> Result<DerivedKeys, StorageError> {
    if record.application_id.is_blank() {
        return Err(StorageError::validation(
            "cannot derive keys for an empty application id",
        ));
    }

    let pk = format!("{APPLICATION_PREFIX}{}", record.application_id);
    let created = format_sort_timestamp(record.created_at);
    let sk = format!("{}{}", record.event_type.as_str(), created);

    let (gs1pk, gs1sk) = match &record.caseworker_id {
        Some(caseworker) => (
            Some(format!("{CASEWORKER_PREFIX}{caseworker}")),
            Some(pk.clone()),
        ),
        None => (None, None),
    };

    Ok(DerivedKeys {
        gs2pk: pk.clone(),
        gs2sk: created,
        pk,
        sk,
        gs1pk,
        gs1sk,
    })
}

/// Fixed-width RFC 3339 rendering whose lexicographic order is chronological
pub fn format_sort_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
