//! Contract tests for the event store backends
//!
//! Every scenario here runs against both engines: the external behavior of
//! append and query must be indistinguishable regardless of which physical
//! store served the request.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use casetrail_core::{EventType, NewEvent};
use casetrail_storage::{
    BlobGatewayConfig, BlobOffloadGateway, EventQuery, EventQueryService, EventStore,
    RelationalEventStore, WideColumnEventStore, WideColumnStoreConfig,
};

fn both_backends(temp: &TempDir) -> Vec<(&'static str, Arc<dyn EventStore>)> {
    let relational = RelationalEventStore::in_memory().unwrap();
    let wide_column = WideColumnEventStore::open(WideColumnStoreConfig {
        db_path: temp.path().join("contract.redb"),
    })
    .unwrap();
    vec![
        ("relational", Arc::new(relational) as Arc<dyn EventStore>),
        ("wide-column", Arc::new(wide_column) as Arc<dyn EventStore>),
    ]
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
}

// ============================================================================
// Append/query round trip
// ============================================================================

#[tokio::test]
async fn test_appended_record_is_queryable() {
    let temp = TempDir::new().unwrap();
    for (name, store) in both_backends(&temp) {
        let record = store
            .append(
                NewEvent::new("app-1", EventType::Created)
                    .with_created_by("intake")
                    .with_payload(serde_json::json!({"channel": "online"})),
            )
            .await
            .unwrap();

        let result = store
            .query(&EventQuery::for_application("app-1"))
            .await
            .unwrap();
        assert_eq!(result.events, vec![record], "backend: {name}");
    }
}

// ============================================================================
// Ordering
// ============================================================================

/// Append CREATED at t1, UPDATED at t2, ASSIGNED at t3; the query must
/// return them in exactly that order on both backends, even though the
/// wide-column primary index sorts ASSIGNED first.
#[tokio::test]
async fn test_chronological_order_across_types() {
    let temp = TempDir::new().unwrap();
    for (name, store) in both_backends(&temp) {
        store
            .append(NewEvent::new("app-A", EventType::Created).with_created_at(at(9)))
            .await
            .unwrap();
        store
            .append(NewEvent::new("app-A", EventType::Updated).with_created_at(at(12)))
            .await
            .unwrap();
        store
            .append(NewEvent::new("app-A", EventType::Assigned).with_created_at(at(15)))
            .await
            .unwrap();

        let result = store
            .query(&EventQuery::for_application("app-A"))
            .await
            .unwrap();
        let types: Vec<EventType> = result.events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![EventType::Created, EventType::Updated, EventType::Assigned],
            "backend: {name}"
        );
        assert!(
            result
                .events
                .windows(2)
                .all(|pair| pair[0].created_at <= pair[1].created_at),
            "backend: {name}"
        );
    }
}

#[tokio::test]
async fn test_same_timestamp_order_is_stable() {
    let temp = TempDir::new().unwrap();
    for (name, store) in both_backends(&temp) {
        for _ in 0..5 {
            store
                .append(NewEvent::new("app-T", EventType::Updated).with_created_at(at(9)))
                .await
                .unwrap();
        }

        let first = store
            .query(&EventQuery::for_application("app-T"))
            .await
            .unwrap();
        let second = store
            .query(&EventQuery::for_application("app-T"))
            .await
            .unwrap();
        assert_eq!(first.events, second.events, "backend: {name}");

        // Ties resolve by id order
        assert!(
            first.events.windows(2).all(|pair| pair[0].id < pair[1].id),
            "backend: {name}"
        );
    }
}

// ============================================================================
// Filtering
// ============================================================================

#[tokio::test]
async fn test_single_type_filter_returns_exact_subset() {
    let temp = TempDir::new().unwrap();
    for (name, store) in both_backends(&temp) {
        store
            .append(NewEvent::new("app-A", EventType::Created).with_created_at(at(9)))
            .await
            .unwrap();
        store
            .append(NewEvent::new("app-A", EventType::Updated).with_created_at(at(12)))
            .await
            .unwrap();
        store
            .append(NewEvent::new("app-A", EventType::Assigned).with_created_at(at(15)))
            .await
            .unwrap();

        let result = store
            .query(&EventQuery::for_application("app-A").with_types([EventType::Assigned]))
            .await
            .unwrap();
        assert_eq!(result.events.len(), 1, "backend: {name}");
        assert_eq!(result.events[0].event_type, EventType::Assigned);
    }
}

#[tokio::test]
async fn test_empty_type_set_equals_no_filter() {
    let temp = TempDir::new().unwrap();
    for (name, store) in both_backends(&temp) {
        for (hour, event_type) in [(9, EventType::Created), (12, EventType::Updated)] {
            store
                .append(NewEvent::new("app-A", event_type).with_created_at(at(hour)))
                .await
                .unwrap();
        }

        let unfiltered = store
            .query(&EventQuery::for_application("app-A"))
            .await
            .unwrap();
        let empty_filter = store
            .query(&EventQuery::for_application("app-A").with_types(Vec::<EventType>::new()))
            .await
            .unwrap();
        assert_eq!(unfiltered.events, empty_filter.events, "backend: {name}");
    }
}

#[tokio::test]
async fn test_caseworker_query_excludes_system_events() {
    let temp = TempDir::new().unwrap();
    for (name, store) in both_backends(&temp) {
        let assigned = store
            .append(
                NewEvent::new("app-A", EventType::Assigned)
                    .with_caseworker("cw-C")
                    .with_created_at(at(9)),
            )
            .await
            .unwrap();
        store
            .append(NewEvent::new("app-A", EventType::Created).with_created_at(at(8)))
            .await
            .unwrap();

        let result = store
            .query(&EventQuery::for_application("app-A").with_caseworker("cw-C"))
            .await
            .unwrap();
        assert_eq!(result.events, vec![assigned], "backend: {name}");
    }
}

// ============================================================================
// Unknown applications and validation
// ============================================================================

#[tokio::test]
async fn test_unknown_application_is_empty_not_error() {
    let temp = TempDir::new().unwrap();
    for (name, store) in both_backends(&temp) {
        store
            .append(NewEvent::new("app-A", EventType::Created))
            .await
            .unwrap();

        let result = store
            .query(&EventQuery::for_application("unknown-app"))
            .await
            .unwrap();
        assert!(result.events.is_empty(), "backend: {name}");
        assert!(result.corrupt.is_empty(), "backend: {name}");
    }
}

#[tokio::test]
async fn test_blank_application_rejected_before_storage() {
    let temp = TempDir::new().unwrap();
    for (name, store) in both_backends(&temp) {
        assert!(
            store
                .append(NewEvent::new("", EventType::Created))
                .await
                .is_err(),
            "backend: {name}"
        );
        assert!(
            store
                .query(&EventQuery::for_application(""))
                .await
                .is_err(),
            "backend: {name}"
        );
    }
}

// ============================================================================
// Blob offload through the service
// ============================================================================

#[tokio::test]
async fn test_offloaded_payload_round_trips_on_both_backends() {
    let temp = TempDir::new().unwrap();
    let payload = serde_json::json!({"assessment": "y".repeat(8192)});

    for (name, store) in both_backends(&temp) {
        let blobs = Arc::new(
            BlobOffloadGateway::new(BlobGatewayConfig {
                base_dir: temp.path().join(format!("blobs-{name}")),
                ..Default::default()
            })
            .await
            .unwrap(),
        );
        let service = EventQueryService::new(store, blobs);

        let record = service
            .append(NewEvent::new("app-A", EventType::NoteAdded).with_payload(payload.clone()))
            .await
            .unwrap();
        assert!(record.data.is_blob(), "backend: {name}");

        let fetched = service
            .query(EventQuery::for_application("app-A"))
            .await
            .unwrap();
        let resolved = service.resolve_payload(&fetched.events[0]).await.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&resolved).unwrap();
        assert_eq!(decoded, payload, "backend: {name}");
    }
}
