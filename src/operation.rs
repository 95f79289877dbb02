// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Buffered remote writes.
//!
//! A [`PendingOperation`] names a *logical* table; the physical name is
//! resolved through [`TableNames`] when the operation is applied, so a queued
//! write follows the aliases in force at replay time.
//!
//! An [`OperationGroup`] is one logical transaction. Groups are applied in
//! order, operations within a group in array order, and a group is only
//! considered done once every operation in it succeeded.
//!
//! ```
//! use cafe_sync::operation::{OperationGroup, PendingOperation, Table};
//! use cafe_sync::storage::query::Filter;
//! use serde_json::json;
//!
//! let group = OperationGroup::new("cancel_order")
//!     .push(PendingOperation::update(
//!         Table::Orders,
//!         json!({"status": "cancelled"}).as_object().cloned().unwrap(),
//!         vec![Filter::eq("id", "o1")],
//!     ))
//!     .push(PendingOperation::delete(Table::PrepQueue, vec![Filter::eq("order_id", "o1")]));
//!
//! assert_eq!(group.operations.len(), 2);
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::TableNames;
use crate::storage::query::Filter;
use crate::storage::traits::{Record, RemoteError, RemoteStore};

/// Logical tables of the remote schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Orders,
    OrderItems,
    Tickets,
    Products,
    Users,
    PrepQueue,
    OrderCodes,
}

impl Table {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orders => "orders",
            Self::OrderItems => "order_items",
            Self::Tickets => "tickets",
            Self::Products => "products",
            Self::Users => "users",
            Self::PrepQueue => "prep_queue",
            Self::OrderCodes => "order_codes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationKind {
    Insert { rows: Vec<Record> },
    Update { values: Record, filter: Vec<Filter> },
    Upsert { rows: Vec<Record>, on_conflict: String },
    Delete { filter: Vec<Filter> },
}

impl OperationKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Upsert { .. } => "upsert",
            Self::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub table: Table,
    #[serde(flatten)]
    pub kind: OperationKind,
}

impl PendingOperation {
    pub fn insert(table: Table, rows: Vec<Record>) -> Self {
        Self { table, kind: OperationKind::Insert { rows } }
    }

    pub fn update(table: Table, values: Record, filter: Vec<Filter>) -> Self {
        Self { table, kind: OperationKind::Update { values, filter } }
    }

    pub fn upsert(table: Table, rows: Vec<Record>, on_conflict: impl Into<String>) -> Self {
        Self {
            table,
            kind: OperationKind::Upsert { rows, on_conflict: on_conflict.into() },
        }
    }

    pub fn delete(table: Table, filter: Vec<Filter>) -> Self {
        Self { table, kind: OperationKind::Delete { filter } }
    }

    pub async fn apply(&self, remote: &dyn RemoteStore, tables: &TableNames) -> Result<(), RemoteError> {
        let table = tables.resolve(self.table);
        debug!(table, kind = self.kind.name(), "Applying remote operation");
        match &self.kind {
            // PostgREST rejects an empty bulk insert; nothing to do anyway.
            OperationKind::Insert { rows } if rows.is_empty() => Ok(()),
            OperationKind::Insert { rows } => remote.insert(table, rows).await,
            OperationKind::Update { values, filter } => remote.update(table, values, filter).await,
            OperationKind::Upsert { rows, .. } if rows.is_empty() => Ok(()),
            OperationKind::Upsert { rows, on_conflict } => remote.upsert(table, rows, on_conflict).await,
            OperationKind::Delete { filter } => remote.delete(table, filter).await,
        }
    }
}

/// Which operation of a group failed, and how.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupFailure {
    pub index: usize,
    pub error: RemoteError,
}

/// One logical transaction's worth of remote writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationGroup {
    pub label: String,
    pub operations: Vec<PendingOperation>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl OperationGroup {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            operations: Vec::new(),
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn push(mut self, operation: PendingOperation) -> Self {
        self.operations.push(operation);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Apply every operation in order, stopping at the first failure.
    /// Operations before the failing one stay applied.
    pub async fn apply(&self, remote: &dyn RemoteStore, tables: &TableNames) -> Result<(), GroupFailure> {
        for (index, operation) in self.operations.iter().enumerate() {
            operation
                .apply(remote, tables)
                .await
                .map_err(|error| GroupFailure { index, error })?;
        }
        Ok(())
    }
}
