// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use super::query::{Filter, Query};

/// A single row as exchanged with either store.
pub type Record = Map<String, Value>;

/// Failure talking to the remote (authoritative) store.
///
/// The adapter decides the variant; callers branch on it with a plain match.
/// Only [`RemoteError::Network`] is eligible for local fallback and queueing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport-level failure: refused connection, DNS, timeout, gateway.
    #[error("remote store unreachable: {0}")]
    Network(String),
    /// The store rejected the payload (constraint, type, permission).
    #[error("remote store rejected request ({code}): {message}")]
    Validation { code: String, message: String },
    /// Anything the adapter could not place in the other two buckets.
    #[error("remote store error: {0}")]
    Unknown(String),
}

impl RemoteError {
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Failure in the local mirror store.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt local row in {table}: {reason}")]
    Serialization { table: String, reason: String },
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Backend(e.to_string())
    }
}

/// The remote store capability: table-oriented CRUD with filter composition.
///
/// `table` arguments are physical names, already resolved through
/// [`crate::config::TableNames`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, query: &Query) -> Result<Vec<Record>, RemoteError>;
    async fn insert(&self, table: &str, rows: &[Record]) -> Result<(), RemoteError>;
    async fn update(&self, table: &str, values: &Record, filter: &[Filter]) -> Result<(), RemoteError>;
    async fn upsert(&self, table: &str, rows: &[Record], on_conflict: &str) -> Result<(), RemoteError>;
    async fn delete(&self, table: &str, filter: &[Filter]) -> Result<(), RemoteError>;

    /// Select at most one row. More than one match is a cardinality violation
    /// and is reported the way PostgREST reports it (`PGRST116`).
    async fn select_maybe_single(&self, query: &Query) -> Result<Option<Record>, RemoteError> {
        let mut rows = self.select(query).await?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            n => Err(RemoteError::validation(
                "PGRST116",
                format!("expected at most one row from {}, got {}", query.table, n),
            )),
        }
    }
}
