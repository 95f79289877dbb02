// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pending-operation queue.
//!
//! Remote writes that could not be delivered are parked here, one row per
//! [`OperationGroup`], inside the same SQLite file as the local mirror. A
//! flush replays groups in id order against the remote store:
//!
//! - the whole group applied: the row is deleted;
//! - a network failure: the row stays, the flush stops, later groups wait;
//! - any other failure: the row moves to `dead_operations` and the flush
//!   carries on, so one poisoned group cannot block the queue forever.
//!
//! Dead letters are kept for an operator to inspect, requeue or discard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::TableNames;
use crate::operation::{OperationGroup, PendingOperation};
use crate::params;
use crate::resilience::health::HealthTracker;
use crate::storage::local::{LocalMirrorStore, Params};
use crate::storage::traits::{Record, RemoteStore, StorageError};

/// Rowid of a queued group. Strictly increasing, never reused.
pub type QueueId = i64;

/// A group waiting for replay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedGroup {
    pub id: QueueId,
    #[serde(flatten)]
    pub group: OperationGroup,
}

/// A group removed from replay after a non-network failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub id: QueueId,
    pub label: String,
    pub operations: Value,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
    /// Index of the failing operation; `None` when the row could not be decoded.
    pub failed_index: Option<usize>,
    pub error: String,
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub applied_groups: usize,
    pub applied_ops: usize,
    pub dead_lettered: usize,
    /// Groups still queued after the pass.
    pub remaining: u64,
    /// Network error that stopped the pass early.
    pub interrupted: Option<String>,
    /// The pass did not run (another flush in progress, or remote gated).
    pub skipped: bool,
}

impl FlushReport {
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending_groups: u64,
    pub dead_letters: u64,
    /// Enqueued since startup.
    pub total_enqueued: u64,
    /// Replayed successfully since startup.
    pub total_flushed: u64,
    pub flushing: bool,
}

pub struct PendingQueue {
    store: Arc<LocalMirrorStore>,
    flushing: AtomicBool,
    total_enqueued: AtomicU64,
    total_flushed: AtomicU64,
}

impl PendingQueue {
    /// Attach to the queue tables of `store`.
    pub async fn open(store: Arc<LocalMirrorStore>) -> Result<Self, StorageError> {
        let queue = Self {
            store,
            flushing: AtomicBool::new(false),
            total_enqueued: AtomicU64::new(0),
            total_flushed: AtomicU64::new(0),
        };
        let pending = queue.pending_count().await?;
        if pending > 0 {
            warn!(pending, "Pending queue has groups from previous run, will replay");
        }
        crate::metrics::set_pending_groups(pending);
        Ok(queue)
    }

    /// Persist a group as a single row. Returns its queue id.
    pub async fn enqueue(&self, group: &OperationGroup) -> Result<QueueId, StorageError> {
        let operations = serde_json::to_string(&group.operations).map_err(serialization)?;
        let metadata = serde_json::to_string(&group.metadata).map_err(serialization)?;

        let id = self
            .store
            .insert(
                "INSERT INTO pending_operations (label, operations, metadata, created_at)
                 VALUES (:label, :operations, :metadata, :created_at)",
                &params! {
                    "label" => group.label,
                    "operations" => operations,
                    "metadata" => metadata,
                    "created_at" => group.created_at.timestamp_millis(),
                },
            )
            .await?;

        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_enqueue(&group.label);
        info!(queue_id = id, label = %group.label, ops = group.operations.len(), "Group queued for replay");
        Ok(id)
    }

    pub async fn pending_count(&self) -> Result<u64, StorageError> {
        self.count("SELECT COUNT(*) AS n FROM pending_operations").await
    }

    pub async fn dead_letter_count(&self) -> Result<u64, StorageError> {
        self.count("SELECT COUNT(*) AS n FROM dead_operations").await
    }

    async fn count(&self, sql: &str) -> Result<u64, StorageError> {
        let row = self.store.get(sql, &Params::new()).await?;
        Ok(row
            .and_then(|r| r.get("n").and_then(Value::as_u64))
            .unwrap_or(0))
    }

    /// Queued groups, oldest first.
    pub async fn pending_groups(&self, limit: usize) -> Result<Vec<QueuedGroup>, StorageError> {
        let rows = self
            .store
            .all(
                "SELECT id, label, operations, metadata, created_at FROM pending_operations
                 ORDER BY id LIMIT :limit",
                &params! { "limit" => limit },
            )
            .await?;
        rows.into_iter().map(decode_group).collect()
    }

    /// Replay queued groups against `remote`. Only one flush runs at a time;
    /// a concurrent call returns a skipped report immediately.
    pub async fn flush(
        &self,
        remote: &dyn RemoteStore,
        health: &HealthTracker,
        tables: &TableNames,
    ) -> Result<FlushReport, StorageError> {
        if self.flushing.swap(true, Ordering::AcqRel) {
            debug!("Flush already in progress");
            return Ok(FlushReport::skipped());
        }
        let _guard = FlushGuard(&self.flushing);
        let start = Instant::now();

        let rows = self
            .store
            .all(
                "SELECT id, label, operations, metadata, created_at FROM pending_operations ORDER BY id",
                &Params::new(),
            )
            .await?;
        if rows.is_empty() {
            return Ok(FlushReport::default());
        }
        info!(groups = rows.len(), "Flushing pending queue");

        let mut report = FlushReport::default();
        for row in rows {
            let id = row.get("id").and_then(Value::as_i64).unwrap_or_default();
            let queued = match decode_group(row) {
                Ok(queued) => queued,
                Err(e) => {
                    error!(queue_id = id, error = %e, "Undecodable queued group, dead-lettering");
                    self.dead_letter(id, None, &e.to_string()).await?;
                    report.dead_lettered += 1;
                    continue;
                }
            };

            match queued.group.apply(remote, tables).await {
                Ok(()) => {
                    self.store
                        .run("DELETE FROM pending_operations WHERE id = :id", &params! { "id" => id })
                        .await?;
                    health.mark_healthy();
                    report.applied_groups += 1;
                    report.applied_ops += queued.group.operations.len();
                    self.total_flushed.fetch_add(1, Ordering::Relaxed);
                    debug!(queue_id = id, label = %queued.group.label, "Queued group replayed");
                }
                Err(failure) if failure.error.is_network() => {
                    health.mark_failure(&failure.error);
                    warn!(
                        queue_id = id,
                        op_index = failure.index,
                        error = %failure.error,
                        "Remote unreachable during flush, stopping"
                    );
                    report.interrupted = Some(failure.error.to_string());
                    break;
                }
                Err(failure) => {
                    error!(
                        queue_id = id,
                        label = %queued.group.label,
                        op_index = failure.index,
                        error = %failure.error,
                        "Queued group rejected by remote, dead-lettering"
                    );
                    self.dead_letter(id, Some(failure.index), &failure.error.to_string())
                        .await?;
                    report.dead_lettered += 1;
                }
            }
        }

        report.remaining = self.pending_count().await?;
        crate::metrics::set_pending_groups(report.remaining);
        crate::metrics::record_flush(
            report.applied_groups,
            report.dead_lettered,
            report.interrupted.is_some(),
            start.elapsed(),
        );
        if report.dead_lettered > 0 {
            crate::metrics::set_dead_letters(self.dead_letter_count().await?);
        }
        info!(
            applied = report.applied_groups,
            dead_lettered = report.dead_lettered,
            remaining = report.remaining,
            "Flush complete"
        );
        Ok(report)
    }

    /// Move a queued row to the dead-letter table, atomically.
    async fn dead_letter(&self, id: QueueId, failed_index: Option<usize>, error: &str) -> Result<(), StorageError> {
        self.store
            .batch(&[
                (
                    "INSERT INTO dead_operations
                       (id, label, operations, metadata, created_at, failed_at, failed_index, error)
                     SELECT id, label, operations, metadata, created_at, :failed_at, :failed_index, :error
                     FROM pending_operations WHERE id = :id",
                    params! {
                        "id" => id,
                        "failed_at" => Utc::now().timestamp_millis(),
                        "failed_index" => failed_index,
                        "error" => error,
                    },
                ),
                ("DELETE FROM pending_operations WHERE id = :id", params! { "id" => id }),
            ])
            .await?;
        Ok(())
    }

    /// Dead letters, most recent failure first.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, StorageError> {
        let rows = self
            .store
            .all(
                "SELECT id, label, operations, metadata, created_at, failed_at, failed_index, error
                 FROM dead_operations ORDER BY failed_at DESC, id DESC LIMIT :limit",
                &params! { "limit" => limit },
            )
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(DeadLetter {
                    id: int(&row, "id")?,
                    label: text(&row, "label")?.to_string(),
                    operations: json_or_text(&row, "operations")?,
                    metadata: json_or_text(&row, "metadata")?,
                    created_at: millis(&row, "created_at")?,
                    failed_at: millis(&row, "failed_at")?,
                    failed_index: row
                        .get("failed_index")
                        .and_then(Value::as_u64)
                        .map(|i| i as usize),
                    error: text(&row, "error")?.to_string(),
                })
            })
            .collect()
    }

    /// Put a dead letter back at the tail of the queue under a fresh id.
    pub async fn requeue_dead_letter(&self, id: QueueId) -> Result<QueueId, StorageError> {
        let executed = self
            .store
            .batch(&[
                (
                    "INSERT INTO pending_operations (label, operations, metadata, created_at)
                     SELECT label, operations, metadata, created_at FROM dead_operations WHERE id = :id",
                    params! { "id" => id },
                ),
                ("DELETE FROM dead_operations WHERE id = :id", params! { "id" => id }),
            ])
            .await?;

        match executed.first() {
            Some(insert) if insert.rows_affected == 1 => {
                let new_id = insert.last_insert_id;
                info!(dead_letter = id, queue_id = new_id, "Dead letter requeued");
                self.total_enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(new_id)
            }
            _ => Err(StorageError::NotFound),
        }
    }

    /// Drop a dead letter for good. Returns whether it existed.
    pub async fn discard_dead_letter(&self, id: QueueId) -> Result<bool, StorageError> {
        let deleted = self
            .store
            .run("DELETE FROM dead_operations WHERE id = :id", &params! { "id" => id })
            .await?;
        if deleted > 0 {
            warn!(dead_letter = id, "Dead letter discarded");
        }
        Ok(deleted > 0)
    }

    pub async fn stats(&self) -> Result<QueueStats, StorageError> {
        Ok(QueueStats {
            pending_groups: self.pending_count().await?,
            dead_letters: self.dead_letter_count().await?,
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_flushed: self.total_flushed.load(Ordering::Relaxed),
            flushing: self.flushing.load(Ordering::Acquire),
        })
    }
}

/// Resets the flushing flag when a flush ends, however it ends.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn serialization(e: impl std::fmt::Display) -> StorageError {
    StorageError::Serialization {
        table: "pending_operations".to_string(),
        reason: e.to_string(),
    }
}

fn decode_group(row: Record) -> Result<QueuedGroup, StorageError> {
    let operations: Vec<PendingOperation> =
        serde_json::from_str(text(&row, "operations")?).map_err(serialization)?;
    Ok(QueuedGroup {
        id: int(&row, "id")?,
        group: OperationGroup {
            label: text(&row, "label")?.to_string(),
            operations,
            metadata: json_column(&row, "metadata")?,
            created_at: millis(&row, "created_at")?,
        },
    })
}

fn text<'r>(row: &'r Record, column: &str) -> Result<&'r str, StorageError> {
    row.get(column)
        .and_then(Value::as_str)
        .ok_or_else(|| serialization(format!("missing text column {column}")))
}

fn int(row: &Record, column: &str) -> Result<i64, StorageError> {
    row.get(column)
        .and_then(Value::as_i64)
        .ok_or_else(|| serialization(format!("missing integer column {column}")))
}

fn millis(row: &Record, column: &str) -> Result<DateTime<Utc>, StorageError> {
    let ms = int(row, column)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| serialization(format!("bad timestamp in {column}")))
}

fn json_column(row: &Record, column: &str) -> Result<Value, StorageError> {
    serde_json::from_str(text(row, column)?).map_err(serialization)
}

/// Dead letters may hold rows that never decoded; keep the raw text then.
fn json_or_text(row: &Record, column: &str) -> Result<Value, StorageError> {
    let raw = text(row, column)?;
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}
