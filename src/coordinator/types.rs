// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync orchestrator.

use serde::Serialize;

use crate::resilience::health::HealthSnapshot;
use crate::resilience::queue::{QueueId, QueueStats};

/// Which store answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Remote,
    Local,
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A read result tagged with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: DataSource,
}

impl<T> Sourced<T> {
    pub fn remote(value: T) -> Self {
        Self { value, source: DataSource::Remote }
    }

    pub fn local(value: T) -> Self {
        Self { value, source: DataSource::Local }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
        }
    }
}

impl<T> Sourced<Option<T>> {
    /// `None` when the lookup missed on whichever side answered.
    pub fn transpose(self) -> Option<Sourced<T>> {
        let source = self.source;
        self.value.map(|value| Sourced { value, source })
    }
}

/// Whether a write reached the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// Applied remotely and mirrored locally.
    Committed,
    /// Mirrored locally and queued for replay.
    Pending {
        queue_id: QueueId,
        /// A remote attempt was made and failed, as opposed to skipped.
        remote_attempted: bool,
    },
}

impl WriteStatus {
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    #[must_use]
    pub fn queue_id(&self) -> Option<QueueId> {
        match self {
            Self::Pending { queue_id, .. } => Some(*queue_id),
            Self::Committed => None,
        }
    }
}

/// A write result and where it landed.
#[derive(Debug, Clone, PartialEq)]
pub struct Written<T> {
    pub value: T,
    pub status: WriteStatus,
}

/// Health and queue state for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub remote: HealthSnapshot,
    pub queue: QueueStats,
    /// Whether the next request would try the remote store.
    pub remote_attempts_allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_status_helpers() {
        let pending = WriteStatus::Pending { queue_id: 7, remote_attempted: true };
        assert!(pending.is_pending());
        assert_eq!(pending.queue_id(), Some(7));
        assert!(!WriteStatus::Committed.is_pending());
        assert_eq!(WriteStatus::Committed.queue_id(), None);
    }

    #[test]
    fn test_sourced_map_keeps_source() {
        let read = Sourced::local(vec![1, 2, 3]).map(|v| v.len());
        assert_eq!(read.value, 3);
        assert_eq!(read.source, DataSource::Local);
        assert_eq!(DataSource::Remote.to_string(), "remote");
    }

    #[test]
    fn test_sourced_transpose() {
        let hit = Sourced::remote(Some("latte")).transpose();
        assert_eq!(hit, Some(Sourced::remote("latte")));
        assert_eq!(Sourced::<Option<u8>>::local(None).transpose(), None);
    }
}
