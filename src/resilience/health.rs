// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote store health.
//!
//! Optimistic: starts healthy, flips to unhealthy on the first network-class
//! failure and back to healthy on the first success. Only connectivity
//! problems count; a rejected payload says nothing about reachability.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::storage::traits::RemoteError;

/// Point-in-time view for status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub consecutive_failures: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
}

pub struct HealthTracker {
    healthy: AtomicBool,
    failures: AtomicU64,
    last_failure: Mutex<Option<(Instant, DateTime<Utc>)>>,
    /// After a failure, how long to skip remote attempts entirely.
    cooldown: Duration,
}

impl HealthTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            healthy: AtomicBool::new(true),
            failures: AtomicU64::new(0),
            last_failure: Mutex::new(None),
            cooldown,
        }
    }

    /// Whether an error is a connectivity problem rather than a real one.
    #[must_use]
    pub fn is_likely_network_error(error: &RemoteError) -> bool {
        match error {
            RemoteError::Network(_) => true,
            RemoteError::Validation { .. } | RemoteError::Unknown(_) => false,
        }
    }

    pub fn mark_healthy(&self) {
        self.failures.store(0, Ordering::Release);
        if !self.healthy.swap(true, Ordering::AcqRel) {
            info!("Remote store reachable again");
            crate::metrics::set_remote_healthy(true);
        }
    }

    /// Record a failed remote call. Returns whether health changed state
    /// bookkeeping, i.e. whether the error was network-classified.
    pub fn mark_failure(&self, error: &RemoteError) -> bool {
        if !Self::is_likely_network_error(error) {
            return false;
        }
        *self.last_failure.lock() = Some((Instant::now(), Utc::now()));
        let failures = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if self.healthy.swap(false, Ordering::AcqRel) {
            warn!(error = %error, "Remote store unreachable, falling back to local mirror");
            crate::metrics::set_remote_healthy(false);
        }
        crate::metrics::record_remote_failure(failures);
        true
    }

    #[must_use]
    pub fn should_prefer_remote(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Whether a remote attempt should be made at all: always when healthy,
    /// otherwise once the cool-down since the last failure has passed.
    #[must_use]
    pub fn should_attempt_remote(&self) -> bool {
        if self.should_prefer_remote() {
            return true;
        }
        match *self.last_failure.lock() {
            Some((at, _)) => at.elapsed() >= self.cooldown,
            None => true,
        }
    }

    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure.lock().map(|(_, at)| at)
    }

    #[must_use]
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            is_healthy: self.should_prefer_remote(),
            consecutive_failures: self.failure_count(),
            last_failure_at: self.last_failure_at(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}
