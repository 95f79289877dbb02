// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use crate::storage::traits::{RemoteError, StorageError};

/// Failure of an orchestrated read or write.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Terminal remote failure (validation or unclassified). Never queued.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("local store error: {0}")]
    Local(#[from] StorageError),

    /// The remote is unreachable and the local fallback failed too.
    #[error("remote store unavailable ({remote}) and local fallback failed ({local})")]
    Unavailable { remote: String, local: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    #[must_use]
    pub fn unavailable(remote: impl ToString, local: impl ToString) -> Self {
        Self::Unavailable {
            remote: remote.to_string(),
            local: local.to_string(),
        }
    }
}
