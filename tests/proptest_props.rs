//! Property-based tests for error classification, health and queue ordering.
//!
//! Run with: `cargo test --test proptest_props`

use std::time::Duration;

use proptest::prelude::*;
use reqwest::StatusCode;
use serde_json::json;

use cafe_sync::storage::postgrest::classify_response;
use cafe_sync::{
    HealthTracker, LocalMirrorStore, MemoryRemote, OperationGroup, PendingOperation, PendingQueue, RemoteError,
    Table, TableNames,
};

// =============================================================================
// Strategies
// =============================================================================

/// Client-error statuses that do not mean "try again later".
fn rejection_status() -> impl Strategy<Value = u16> {
    (400u16..500).prop_filter("timeouts and rate limits are retryable", |s| *s != 408 && *s != 429)
}

fn gateway_status() -> impl Strategy<Value = u16> {
    prop_oneof![Just(408u16), Just(429), Just(502), Just(503), Just(504)]
}

/// Postgres SQLSTATE for integrity violations: class 23.
fn constraint_body() -> impl Strategy<Value = String> {
    ("23[0-9]{3}", "[a-z ]{0,40}")
        .prop_map(|(code, message)| json!({"code": code, "message": message, "details": null}).to_string())
}

fn network_error() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        "[0-9]{1,5}".prop_map(|port| RemoteError::Network(format!("connect ECONNREFUSED 127.0.0.1:{port}"))),
        Just(RemoteError::Network("operation timed out".into())),
        gateway_status().prop_map(|s| classify_response(StatusCode::from_u16(s).unwrap(), "")),
    ]
}

// =============================================================================
// Classification
// =============================================================================

proptest! {
    #[test]
    fn prop_constraint_violations_are_not_network(status in rejection_status(), body in constraint_body()) {
        let err = classify_response(StatusCode::from_u16(status).unwrap(), &body);
        prop_assert!(!HealthTracker::is_likely_network_error(&err), "{err:?}");
        let is_validation = matches!(err, RemoteError::Validation { ref code, .. } if code.starts_with("23"));
        prop_assert!(is_validation);
    }

    #[test]
    fn prop_gateway_failures_are_network(status in gateway_status(), body in ".{0,80}") {
        let err = classify_response(StatusCode::from_u16(status).unwrap(), &body);
        prop_assert!(HealthTracker::is_likely_network_error(&err), "{err:?}");
    }

    #[test]
    fn prop_server_errors_are_not_network(status in 500u16..600, body in ".{0,80}") {
        prop_assume!(![502, 503, 504].contains(&status));
        let err = classify_response(StatusCode::from_u16(status).unwrap(), &body);
        prop_assert!(!err.is_network());
    }
}

// =============================================================================
// Health
// =============================================================================

proptest! {
    #[test]
    fn prop_health_flips_on_first_success(failures in prop::collection::vec(network_error(), 1..20)) {
        let health = HealthTracker::new(Duration::ZERO);
        for err in &failures {
            health.mark_failure(err);
        }
        prop_assert!(!health.should_prefer_remote());
        prop_assert_eq!(health.failure_count(), failures.len() as u64);

        health.mark_healthy();
        prop_assert!(health.should_prefer_remote());
        prop_assert_eq!(health.failure_count(), 0);
    }

    #[test]
    fn prop_rejections_never_flip_health(codes in prop::collection::vec("[0-9A-Z]{5}", 1..20)) {
        let health = HealthTracker::new(Duration::ZERO);
        for code in codes {
            health.mark_failure(&RemoteError::validation(code, "rejected"));
        }
        prop_assert!(health.should_prefer_remote());
    }
}

// =============================================================================
// Queue ordering
// =============================================================================

/// Groups of 1..4 inserts into `products`, each row tagged with its group
/// and position.
fn groups() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..4, 1..8)
}

fn build_group(g: usize, size: usize) -> OperationGroup {
    (0..size).fold(OperationGroup::new(format!("g{g}")), |group, i| {
        let row = json!({"id": format!("{g}-{i}"), "name": format!("item {i}"), "price": 1.0});
        group.push(PendingOperation::insert(Table::Products, vec![row.as_object().cloned().unwrap()]))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_flush_applies_groups_in_enqueue_order(sizes in groups()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = std::sync::Arc::new(LocalMirrorStore::open(dir.path().join("q.sqlite")).await.unwrap());
            let queue = PendingQueue::open(store).await.unwrap();
            for (g, size) in sizes.iter().enumerate() {
                queue.enqueue(&build_group(g, *size)).await.unwrap();
            }

            let remote = MemoryRemote::new();
            let report = queue
                .flush(&remote, &HealthTracker::default(), &TableNames::default())
                .await
                .unwrap();
            assert_eq!(report.applied_groups, sizes.len());
            assert_eq!(report.remaining, 0);

            let ids: Vec<String> = remote
                .rows("products")
                .iter()
                .map(|r| r["id"].as_str().unwrap().to_string())
                .collect();
            let expected: Vec<String> = sizes
                .iter()
                .enumerate()
                .flat_map(|(g, size)| (0..*size).map(move |i| format!("{g}-{i}")))
                .collect();
            assert_eq!(ids, expected);
        });
    }

    #[test]
    fn prop_offline_flush_keeps_every_group(sizes in groups()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = std::sync::Arc::new(LocalMirrorStore::open(dir.path().join("q.sqlite")).await.unwrap());
            let queue = PendingQueue::open(store).await.unwrap();
            let mut ids = Vec::new();
            for (g, size) in sizes.iter().enumerate() {
                ids.push(queue.enqueue(&build_group(g, *size)).await.unwrap());
            }

            let remote = MemoryRemote::new();
            remote.set_offline(true);
            let health = HealthTracker::default();
            let report = queue.flush(&remote, &health, &TableNames::default()).await.unwrap();

            assert!(report.interrupted.is_some());
            assert_eq!(report.remaining, sizes.len() as u64);
            assert!(!health.should_prefer_remote());
            let pending: Vec<i64> = queue.pending_groups(100).await.unwrap().iter().map(|q| q.id).collect();
            assert_eq!(pending, ids);
        });
    }
}
