// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator.
//!
//! [`CafeSync`] owns the decision of where each request goes. Every request
//! runs the same steps in order:
//!
//! ```text
//! flush queue (best effort) → read or write → respond
//! ```
//!
//! - **Reads** go remote while the remote is believed healthy, falling back
//!   to the local mirror on a network failure. Otherwise they go straight to
//!   the mirror.
//! - **Writes** try the remote store (unless a cool-down says not to). A
//!   network failure queues the complete operation group and mirrors it
//!   locally; any other failure is returned to the caller untouched.
//!
//! # Example
//!
//! ```rust,no_run
//! use cafe_sync::{CafeSync, CafeSyncConfig};
//! use cafe_sync::model::NewOrder;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let sync = CafeSync::from_config(&CafeSyncConfig::default()).await?;
//!
//! let order: NewOrder = serde_json::from_value(json!({
//!     "customerName": "Ana",
//!     "items": [{"name": "Flat white", "quantity": 1, "unitPrice": 3.2}]
//! }))?;
//! let written = sync.save_order(order).await?;
//! println!("saved {} pending={}", written.value.id(), written.status.is_pending());
//! # Ok(())
//! # }
//! ```

mod catalog;
mod lifecycle;
mod orders;
mod types;

pub use types::{DataSource, Sourced, SyncStatus, WriteStatus, Written};

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::TableNames;
use crate::error::SyncError;
use crate::operation::OperationGroup;
use crate::resilience::health::HealthTracker;
use crate::resilience::queue::{DeadLetter, FlushReport, PendingQueue, QueueId};
use crate::storage::local::LocalMirrorStore;
use crate::storage::traits::{RemoteError, RemoteStore, StorageError};

pub struct CafeSync {
    pub(super) remote: Arc<dyn RemoteStore>,
    pub(super) local: Arc<LocalMirrorStore>,
    pub(super) queue: PendingQueue,
    pub(super) health: Arc<HealthTracker>,
    pub(super) tables: TableNames,
}

impl CafeSync {
    /// Wire the orchestrator from already-open stores.
    pub async fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<LocalMirrorStore>,
        health: Arc<HealthTracker>,
        tables: TableNames,
    ) -> Result<Self, SyncError> {
        let queue = PendingQueue::open(Arc::clone(&local)).await?;
        Ok(Self {
            remote,
            local,
            queue,
            health,
            tables,
        })
    }

    #[must_use]
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    #[must_use]
    pub fn local(&self) -> &Arc<LocalMirrorStore> {
        &self.local
    }

    #[must_use]
    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    #[must_use]
    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Replay queued groups now. Skipped while the remote is in cool-down.
    #[tracing::instrument(skip(self))]
    pub async fn flush_pending(&self) -> Result<FlushReport, SyncError> {
        if !self.health.should_attempt_remote() {
            debug!("Remote in cool-down, flush skipped");
            return Ok(FlushReport::skipped());
        }
        Ok(self
            .queue
            .flush(self.remote.as_ref(), &self.health, &self.tables)
            .await?)
    }

    /// Flush at the start of a request. Never fails the request.
    pub(super) async fn flush_best_effort(&self) {
        if let Err(e) = self.flush_pending().await {
            error!(error = %e, "Pending queue flush failed");
        }
    }

    /// Run `remote` when the remote store is preferred, falling back to
    /// `local` when it is not or when `remote` fails with a network error.
    pub(super) async fn read_through<T, R, L>(
        &self,
        operation: &'static str,
        remote: R,
        local: L,
    ) -> Result<Sourced<T>, SyncError>
    where
        R: Future<Output = Result<T, RemoteError>>,
        L: Future<Output = Result<T, StorageError>>,
    {
        self.flush_best_effort().await;

        if !self.health.should_prefer_remote() {
            debug!(operation, "Remote unhealthy, reading local mirror");
            crate::metrics::record_fallback_read(operation);
            return local
                .await
                .map(Sourced::local)
                .map_err(|e| SyncError::unavailable("remote marked unhealthy", e));
        }

        match remote.await {
            Ok(value) => {
                self.health.mark_healthy();
                Ok(Sourced::remote(value))
            }
            Err(e) if e.is_network() => {
                self.health.mark_failure(&e);
                warn!(operation, error = %e, "Remote read failed, falling back to local mirror");
                crate::metrics::record_fallback_read(operation);
                local
                    .await
                    .map(Sourced::local)
                    .map_err(|local_err| SyncError::unavailable(&e, local_err))
            }
            Err(e) => Err(SyncError::Remote(e)),
        }
    }

    /// Deliver `group` to the remote store, or queue it.
    ///
    /// `mirror` writes the same change to the local mirror. It is best
    /// effort: a mirror failure is logged and never fails the write. Failing
    /// to enqueue is fatal, since the write would otherwise be lost.
    pub(super) async fn write_group<M>(&self, group: OperationGroup, mirror: M) -> Result<WriteStatus, SyncError>
    where
        M: Future<Output = Result<(), StorageError>>,
    {
        self.flush_best_effort().await;

        let label = group.label.clone();
        let remote_attempted = self.health.should_attempt_remote();
        if remote_attempted {
            match group.apply(self.remote.as_ref(), &self.tables).await {
                Ok(()) => {
                    self.health.mark_healthy();
                    mirror_best_effort(&label, mirror).await;
                    debug!(label = %label, "Write committed remotely");
                    return Ok(WriteStatus::Committed);
                }
                Err(failure) if failure.error.is_network() => {
                    self.health.mark_failure(&failure.error);
                    warn!(
                        label = %label,
                        op_index = failure.index,
                        error = %failure.error,
                        "Remote write failed, queueing for replay"
                    );
                }
                Err(failure) => {
                    warn!(label = %label, op_index = failure.index, error = %failure.error, "Remote rejected write");
                    return Err(SyncError::Remote(failure.error));
                }
            }
        } else {
            debug!(label = %label, "Remote in cool-down, queueing write without attempt");
        }

        let queue_id = self.queue.enqueue(&group).await.map_err(|e| {
            error!(label = %label, error = %e, "Failed to queue write");
            SyncError::unavailable("remote write not delivered", e)
        })?;
        mirror_best_effort(&label, mirror).await;
        if let Ok(pending) = self.queue.pending_count().await {
            crate::metrics::set_pending_groups(pending);
        }

        Ok(WriteStatus::Pending {
            queue_id,
            remote_attempted,
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn sync_status(&self) -> Result<SyncStatus, SyncError> {
        Ok(SyncStatus {
            remote: self.health.snapshot(),
            queue: self.queue.stats().await?,
            remote_attempts_allowed: self.health.should_attempt_remote(),
        })
    }

    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<DeadLetter>, SyncError> {
        Ok(self.queue.dead_letters(limit).await?)
    }

    /// Give a dead-lettered group another go at the tail of the queue.
    #[tracing::instrument(skip(self))]
    pub async fn requeue_dead_letter(&self, id: QueueId) -> Result<QueueId, SyncError> {
        self.queue.requeue_dead_letter(id).await.map_err(|e| match e {
            StorageError::NotFound => SyncError::NotFound(format!("dead letter {id}")),
            other => SyncError::Local(other),
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn discard_dead_letter(&self, id: QueueId) -> Result<(), SyncError> {
        if self.queue.discard_dead_letter(id).await? {
            Ok(())
        } else {
            Err(SyncError::NotFound(format!("dead letter {id}")))
        }
    }
}

async fn mirror_best_effort<M>(label: &str, mirror: M)
where
    M: Future<Output = Result<(), StorageError>>,
{
    if let Err(e) = mirror.await {
        warn!(label, error = %e, "Local mirror write failed");
        crate::metrics::record_mirror_error(label);
    }
}
