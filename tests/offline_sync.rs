//! Offline behaviour of the cafe sync orchestrator.
//!
//! Uses the in-memory remote, wrapped by [`FlakyRemote`] where a test needs
//! a failure at a precise call, and a real SQLite mirror in a temp dir.
//!
//! Run with: `cargo test --test offline_sync`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};
use tempfile::TempDir;

use cafe_sync::model::{NewOrder, OrderStatus};
use cafe_sync::server::routes::create_order;
use cafe_sync::storage::query::{Filter, Query};
use cafe_sync::{
    CafeSync, DataSource, HealthTracker, LocalMirrorStore, MemoryRemote, OperationGroup, PendingOperation,
    Record, RemoteError, RemoteStore, SyncError, Table, TableNames, WriteStatus,
};

// =============================================================================
// Failure injection
// =============================================================================

/// Wraps a [`MemoryRemote`] and fails chosen calls (1-indexed, counting
/// every trait call) with a chosen error.
struct FlakyRemote {
    inner: Arc<MemoryRemote>,
    calls: AtomicU64,
    fail_on_calls: parking_lot::Mutex<Vec<u64>>,
    error: RemoteError,
    fail_everything: AtomicBool,
}

impl FlakyRemote {
    fn new(inner: Arc<MemoryRemote>, error: RemoteError) -> Self {
        Self {
            inner,
            calls: AtomicU64::new(0),
            fail_on_calls: parking_lot::Mutex::new(Vec::new()),
            error,
            fail_everything: AtomicBool::new(false),
        }
    }

    /// Fail the `n`th call from now.
    fn fail_in(&self, n: u64) {
        let now = self.calls.load(Ordering::SeqCst);
        self.fail_on_calls.lock().push(now + n);
    }

    fn set_failing(&self, failing: bool) {
        self.fail_everything.store(failing, Ordering::SeqCst);
    }

    fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<(), RemoteError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_everything.load(Ordering::SeqCst) || self.fail_on_calls.lock().contains(&call) {
            Err(self.error.clone())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn select(&self, query: &Query) -> Result<Vec<Record>, RemoteError> {
        self.maybe_fail()?;
        self.inner.select(query).await
    }

    async fn insert(&self, table: &str, rows: &[Record]) -> Result<(), RemoteError> {
        self.maybe_fail()?;
        self.inner.insert(table, rows).await
    }

    async fn update(&self, table: &str, values: &Record, filter: &[Filter]) -> Result<(), RemoteError> {
        self.maybe_fail()?;
        self.inner.update(table, values, filter).await
    }

    async fn upsert(&self, table: &str, rows: &[Record], on_conflict: &str) -> Result<(), RemoteError> {
        self.maybe_fail()?;
        self.inner.upsert(table, rows, on_conflict).await
    }

    async fn delete(&self, table: &str, filter: &[Filter]) -> Result<(), RemoteError> {
        self.maybe_fail()?;
        self.inner.delete(table, filter).await
    }
}

// =============================================================================
// Fixtures
// =============================================================================

struct Harness {
    sync: Arc<CafeSync>,
    memory: Arc<MemoryRemote>,
    _dir: TempDir,
}

async fn harness_with(remote: Arc<dyn RemoteStore>, memory: Arc<MemoryRemote>, cooldown: Duration) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalMirrorStore::open(dir.path().join("mirror.sqlite")).await.unwrap();
    let sync = CafeSync::new(
        remote,
        Arc::new(local),
        Arc::new(HealthTracker::new(cooldown)),
        TableNames::default(),
    )
    .await
    .unwrap();
    Harness {
        sync: Arc::new(sync),
        memory,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    let memory = Arc::new(MemoryRemote::new());
    harness_with(memory.clone(), memory, Duration::ZERO).await
}

fn two_item_order(id: &str) -> NewOrder {
    serde_json::from_value(json!({
        "id": id,
        "customerName": "Ana",
        "items": [
            {"name": "Flat white", "quantity": 2, "unitPrice": 3.2},
            {"name": "Brownie", "quantity": 1, "unitPrice": 2.75}
        ]
    }))
    .unwrap()
}

fn row(v: Value) -> Record {
    v.as_object().cloned().unwrap()
}

async fn response_json(response: axum::response::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_offline_write_is_queued_and_mirrored() {
    let h = harness().await;
    h.memory.set_offline(true);

    let response = create_order(State(h.sync.clone()), Ok(Json(two_item_order("O1"))))
        .await
        .into_response();
    let (status, body) = response_json(response).await;

    assert_eq!(status, 202);
    assert_eq!(body["pendingSync"], true);
    let queue_id = body["queueId"].as_i64().expect("queueId");

    let pending = h.sync.queue().pending_groups(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, queue_id);
    let kinds: Vec<String> = pending[0]
        .group
        .operations
        .iter()
        .map(|op| format!("{}:{}", op.kind.name(), op.table))
        .collect();
    assert!(kinds.len() >= 3);
    assert_eq!(&kinds[..3], &["upsert:orders", "delete:order_items", "insert:order_items"]);

    // The till can still see the order.
    let mirrored = h.sync.local().mirrored_order("O1").await.unwrap().unwrap();
    assert_eq!(mirrored.items.len(), 2);
    assert!(!h.sync.health().should_prefer_remote());
}

#[tokio::test]
async fn test_flush_replays_queue_when_remote_returns() {
    let h = harness().await;
    h.memory.set_offline(true);
    let written = h.sync.save_order(two_item_order("O1")).await.unwrap();
    assert!(written.status.is_pending());

    h.memory.set_offline(false);
    let report = h.sync.flush_pending().await.unwrap();

    assert_eq!(report.applied_groups, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(h.sync.queue().pending_count().await.unwrap(), 0);
    assert!(h.sync.health().should_prefer_remote());

    let items = h
        .memory
        .select(&Query::from("order_items").eq("order_id", "O1").order("position", true))
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["name"], "Flat white");
    assert_eq!(items[0]["quantity"], 2);
    assert_eq!(items[0]["unit_price"], 3.2);
    assert_eq!(items[1]["unit_price"], 2.75);
}

#[tokio::test]
async fn test_rejected_write_is_not_queued() {
    let memory = Arc::new(MemoryRemote::new().with_unique("tickets", "ticket_number"));
    let h = harness_with(memory.clone(), memory, Duration::ZERO).await;

    let first: NewOrder = serde_json::from_value(json!({
        "id": "O1", "ticketNumber": "T-100",
        "items": [{"name": "Tea", "quantity": 1, "unitPrice": 2.0}]
    }))
    .unwrap();
    h.sync.save_order(first).await.unwrap();

    let clash: NewOrder = serde_json::from_value(json!({
        "id": "O2", "ticketNumber": "T-100",
        "items": [{"name": "Tea", "quantity": 1, "unitPrice": 2.0}]
    }))
    .unwrap();
    let response = create_order(State(h.sync.clone()), Ok(Json(clash))).await.into_response();
    let (status, body) = response_json(response).await;

    assert_eq!(status, 500);
    assert_eq!(body["success"], false);
    assert_eq!(h.sync.queue().pending_count().await.unwrap(), 0);
    // A rejected payload says nothing about connectivity.
    assert!(h.sync.health().should_prefer_remote());
}

#[tokio::test]
async fn test_skipped_remote_reports_not_attempted() {
    let memory = Arc::new(MemoryRemote::new());
    let h = harness_with(memory.clone(), memory, Duration::from_secs(3600)).await;
    h.memory.set_offline(true);

    let first = h.sync.save_order(two_item_order("O1")).await.unwrap();
    assert!(matches!(first.status, WriteStatus::Pending { remote_attempted: true, .. }));

    let response = create_order(State(h.sync.clone()), Ok(Json(two_item_order("O2"))))
        .await
        .into_response();
    let (status, body) = response_json(response).await;
    assert_eq!(status, 201);
    assert_eq!(body["pendingSync"], true);
    assert_eq!(h.sync.queue().pending_count().await.unwrap(), 2);
}

// =============================================================================
// Queue replay
// =============================================================================

#[tokio::test]
async fn test_groups_replay_in_enqueue_order() {
    let memory = Arc::new(MemoryRemote::new());
    let h = harness().await;
    let queue = h.sync.queue();
    let g1 = OperationGroup::new("g1")
        .push(PendingOperation::insert(Table::Products, vec![row(json!({"id": "a", "name": "A", "price": 1.0}))]))
        .push(PendingOperation::insert(Table::Products, vec![row(json!({"id": "b", "name": "B", "price": 1.0}))]));
    let g2 = OperationGroup::new("g2")
        .push(PendingOperation::insert(Table::Users, vec![row(json!({"id": "u1"}))]));
    queue.enqueue(&g1).await.unwrap();
    queue.enqueue(&g2).await.unwrap();

    let report = queue
        .flush(memory.as_ref(), h.sync.health(), h.sync.tables())
        .await
        .unwrap();
    assert_eq!(report.applied_groups, 2);
    assert_eq!(memory.journal(), vec!["insert:products", "insert:products", "insert:users"]);
}

#[tokio::test]
async fn test_partial_group_failure_keeps_group() {
    let memory = Arc::new(MemoryRemote::new());
    let flaky = Arc::new(FlakyRemote::new(memory.clone(), RemoteError::Network("timed out".into())));
    let h = harness_with(flaky.clone(), memory.clone(), Duration::ZERO).await;

    let group = OperationGroup::new("three")
        .push(PendingOperation::insert(Table::Products, vec![row(json!({"id": "a", "name": "A", "price": 1.0}))]))
        .push(PendingOperation::insert(Table::Products, vec![row(json!({"id": "b", "name": "B", "price": 1.0}))]))
        .push(PendingOperation::insert(Table::Products, vec![row(json!({"id": "c", "name": "C", "price": 1.0}))]));
    h.sync.queue().enqueue(&group).await.unwrap();

    flaky.fail_in(2);
    let report = h.sync.flush_pending().await.unwrap();

    assert_eq!(report.applied_groups, 0);
    assert!(report.interrupted.is_some());
    assert_eq!(report.remaining, 1);
    // First op landed, third was never tried.
    assert_eq!(memory.journal(), vec!["insert:products"]);
    assert_eq!(flaky.calls(), 2);
}

#[tokio::test]
async fn test_write_interrupted_midway_is_queued_whole() {
    let memory = Arc::new(MemoryRemote::new());
    let flaky = Arc::new(FlakyRemote::new(memory.clone(), RemoteError::Network("connection reset".into())));
    let h = harness_with(flaky.clone(), memory.clone(), Duration::ZERO).await;

    // Order upsert and item delete land, item insert fails.
    flaky.fail_in(3);
    let written = h.sync.save_order(two_item_order("O1")).await.unwrap();
    assert!(matches!(written.status, WriteStatus::Pending { remote_attempted: true, .. }));
    assert_eq!(memory.journal(), vec!["upsert:orders", "delete:order_items"]);
    assert_eq!(memory.rows("orders").len(), 1);
    assert_eq!(memory.rows("order_items").len(), 0);

    let report = h.sync.flush_pending().await.unwrap();
    assert_eq!(report.applied_groups, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(memory.rows("order_items").len(), 2);
    assert_eq!(memory.rows("tickets").len(), 1);
    assert_eq!(memory.rows("order_codes").len(), 1);

    let read = h.sync.get_order("O1").await.unwrap();
    assert_eq!(read.source, DataSource::Remote);
    assert_eq!(read.value.items.len(), 2);
}

#[tokio::test]
async fn test_upsert_replay_is_idempotent() {
    let memory = MemoryRemote::new();
    let tables = TableNames::default();
    let first = PendingOperation::upsert(Table::Products, vec![row(json!({"id": "p1", "name": "Mocha", "price": 4.0}))], "id");
    let second = PendingOperation::upsert(Table::Products, vec![row(json!({"id": "p1", "name": "Mocha", "price": 4.5}))], "id");

    first.apply(&memory, &tables).await.unwrap();
    second.apply(&memory, &tables).await.unwrap();
    second.apply(&memory, &tables).await.unwrap();

    let rows = memory.rows("products");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["price"], 4.5);
}

#[tokio::test]
async fn test_save_order_replay_converges() {
    let h = harness().await;
    h.memory.set_offline(true);
    h.sync.save_order(two_item_order("O1")).await.unwrap();
    h.sync.save_order(two_item_order("O1")).await.unwrap();
    h.memory.set_offline(false);

    let report = h.sync.flush_pending().await.unwrap();
    assert_eq!(report.applied_groups, 2);
    assert_eq!(h.memory.rows("orders").len(), 1);
    assert_eq!(h.memory.rows("order_items").len(), 2);
    assert_eq!(h.memory.rows("tickets").len(), 1);
    assert_eq!(h.memory.rows("order_codes").len(), 1);
    assert_eq!(h.memory.rows("prep_queue").len(), 1);
}

#[tokio::test]
async fn test_rejected_replay_is_dead_lettered() {
    let memory = Arc::new(MemoryRemote::new());
    let flaky = Arc::new(FlakyRemote::new(
        memory.clone(),
        RemoteError::validation("23503", "violates foreign key constraint"),
    ));
    let h = harness_with(flaky.clone(), memory.clone(), Duration::ZERO).await;

    let bad = OperationGroup::new("bad")
        .push(PendingOperation::insert(Table::Users, vec![row(json!({"id": "u1"}))]));
    let good = OperationGroup::new("good")
        .push(PendingOperation::insert(Table::Users, vec![row(json!({"id": "u2"}))]));
    h.sync.queue().enqueue(&bad).await.unwrap();
    h.sync.queue().enqueue(&good).await.unwrap();

    flaky.fail_in(1);
    let report = h.sync.flush_pending().await.unwrap();
    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.applied_groups, 1);

    let dead = h.sync.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].label, "bad");
    assert_eq!(dead[0].failed_index, Some(0));

    let requeued = h.sync.requeue_dead_letter(dead[0].id).await.unwrap();
    assert!(requeued > 0);
    let report = h.sync.flush_pending().await.unwrap();
    assert_eq!(report.applied_groups, 1);
    assert_eq!(memory.rows("users").len(), 2);

    let err = h.sync.discard_dead_letter(999).await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_unhealthy_reads_never_touch_remote() {
    let memory = Arc::new(MemoryRemote::new());
    let flaky = Arc::new(FlakyRemote::new(memory.clone(), RemoteError::Network("refused".into())));
    let h = harness_with(flaky.clone(), memory, Duration::from_secs(3600)).await;

    h.sync.save_order(two_item_order("O1")).await.unwrap();
    flaky.set_failing(true);
    // Marks the remote unhealthy.
    let read = h.sync.get_order("O1").await.unwrap();
    assert_eq!(read.source, DataSource::Local);

    let before = flaky.calls();
    let read = h.sync.get_order("O1").await.unwrap();
    assert_eq!(read.source, DataSource::Local);
    assert_eq!(read.value.items.len(), 2);
    let listed = h.sync.list_orders(Default::default()).await.unwrap();
    assert_eq!(listed.source, DataSource::Local);
    assert_eq!(flaky.calls(), before);
}

#[tokio::test]
async fn test_status_change_offline_updates_prep_queue() {
    let h = harness().await;
    h.sync.save_order(two_item_order("O1")).await.unwrap();
    h.sync.save_order(two_item_order("O2")).await.unwrap();

    h.memory.set_offline(true);
    let written = h.sync.update_order_status("O1", OrderStatus::Completed).await.unwrap();
    assert!(written.status.is_pending());
    assert_eq!(written.value.order.status, OrderStatus::Completed);

    let queue = h.sync.prep_queue().await.unwrap();
    assert_eq!(queue.source, DataSource::Local);
    let ids: Vec<&str> = queue.value.iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec!["O2"]);

    h.memory.set_offline(false);
    h.sync.flush_pending().await.unwrap();
    let remote = h.sync.prep_queue().await.unwrap();
    assert_eq!(remote.source, DataSource::Remote);
    assert_eq!(remote.value.len(), 1);
    assert_eq!(remote.value[0].id(), "O2");
}

#[tokio::test]
async fn test_lookup_by_code_and_ticket() {
    let h = harness().await;
    let order: NewOrder = serde_json::from_value(json!({
        "id": "O9", "code": "abc123", "ticketNumber": "T-9",
        "items": [{"name": "Espresso", "quantity": 1, "unitPrice": 2.1}]
    }))
    .unwrap();
    h.sync.save_order(order).await.unwrap();

    let by_code = h.sync.find_order_by_code("abc123").await.unwrap();
    assert_eq!(by_code.source, DataSource::Remote);
    assert_eq!(by_code.value.id(), "O9");
    assert_eq!(h.sync.get_ticket("T-9").await.unwrap().value.order_id, "O9");

    h.memory.set_offline(true);
    let offline = h.sync.find_order_by_code("ABC123").await.unwrap();
    assert_eq!(offline.source, DataSource::Local);
    assert_eq!(offline.value.id(), "O9");
    assert_eq!(h.sync.get_ticket("T-9").await.unwrap().source, DataSource::Local);
}

#[tokio::test]
async fn test_delete_order_offline() {
    let h = harness().await;
    h.sync.save_order(two_item_order("O1")).await.unwrap();
    h.memory.set_offline(true);

    let deleted = h.sync.delete_order("O1").await.unwrap();
    assert!(deleted.status.is_pending());
    let err = h.sync.get_order("O1").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));

    h.memory.set_offline(false);
    h.sync.flush_pending().await.unwrap();
    assert!(h.memory.rows("orders").is_empty());
    assert!(h.memory.rows("order_items").is_empty());
    assert!(h.memory.rows("tickets").is_empty());
}

#[tokio::test]
async fn test_products_fall_back_to_mirror() {
    let h = harness().await;
    h.memory
        .insert(
            "products",
            &[
                row(json!({"id": "p2", "name": "Scone", "price": 2.5})),
                row(json!({"id": "p1", "name": "Americano", "price": 2.8})),
            ],
        )
        .await
        .unwrap();

    let online = h.sync.list_products().await.unwrap();
    assert_eq!(online.source, DataSource::Remote);
    assert_eq!(online.value[0].name, "Americano");

    h.memory.set_offline(true);
    let offline = h.sync.list_products().await.unwrap();
    assert_eq!(offline.source, DataSource::Local);
    assert_eq!(offline.value.len(), 2);
    assert_eq!(h.sync.get_product("p2").await.unwrap().value.name, "Scone");
}

#[tokio::test]
async fn test_offline_miss_is_not_found() {
    let h = harness().await;
    h.memory.set_offline(true);
    let err = h.sync.get_user("nobody").await.unwrap_err();
    assert!(matches!(err, SyncError::NotFound(_)));
}
