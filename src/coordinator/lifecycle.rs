// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Startup, background flushing and shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::CafeSync;
use crate::config::CafeSyncConfig;
use crate::error::SyncError;
use crate::resilience::health::HealthTracker;
use crate::storage::local::LocalMirrorStore;
use crate::storage::memory::MemoryRemote;
use crate::storage::postgrest::PostgrestStore;
use crate::storage::traits::RemoteStore;

impl CafeSync {
    /// Build the orchestrator from configuration.
    ///
    /// Startup order:
    /// 1. Remote adapter (PostgREST, or in-memory when no URL is configured)
    /// 2. Local mirror store (retried internally while the file is locked)
    /// 3. Pending queue, reporting groups left over from the last run
    #[tracing::instrument(skip(config), fields(remote_configured = config.supabase_url.is_some()))]
    pub async fn from_config(config: &CafeSyncConfig) -> Result<Self, SyncError> {
        let startup_start = Instant::now();
        info!("Starting cafe sync...");

        let remote: Arc<dyn RemoteStore> = match &config.supabase_url {
            Some(url) => {
                if config.supabase_key.is_none() {
                    warn!("No Supabase key configured, remote requests will be anonymous");
                }
                info!(url = %url, "Using PostgREST remote store");
                Arc::new(PostgrestStore::new(url.clone(), config.supabase_key.clone(), config.remote_timeout())?)
            }
            None => {
                warn!("SUPABASE_URL not set - using in-memory remote store, data will not leave this process!");
                Arc::new(MemoryRemote::new())
            }
        };

        let local = LocalMirrorStore::open(&config.local_store_path).await?;
        info!(path = %local.path(), "Local mirror store ready");

        let health = Arc::new(HealthTracker::new(config.retry_cooldown()));
        let sync = Self::new(remote, Arc::new(local), health, config.tables.clone()).await?;

        crate::metrics::record_startup_total(startup_start.elapsed());
        info!(elapsed = ?startup_start.elapsed(), "Cafe sync ready");
        Ok(sync)
    }

    /// Flush the queue every `period` until `shutdown` flips to true.
    pub async fn run_flush_ticker(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(?period, "Background flush running");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.flush_pending().await {
                        Ok(report) if report.applied_groups > 0 || report.dead_lettered > 0 => {
                            info!(
                                applied = report.applied_groups,
                                dead_lettered = report.dead_lettered,
                                remaining = report.remaining,
                                "Background flush"
                            );
                        }
                        Ok(_) => debug!("Background flush: nothing to do"),
                        Err(e) => error!(error = %e, "Background flush failed"),
                    }
                }

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Background flush stopped");
    }

    #[must_use]
    pub fn spawn_flush_ticker(self: &Arc<Self>, period: Duration, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_flush_ticker(period, shutdown))
    }

    /// Last chance to deliver queued groups before the process exits.
    /// Whatever is left stays in the local store for the next run.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        info!("Initiating cafe sync shutdown...");
        match self.flush_pending().await {
            Ok(report) if report.remaining > 0 => {
                warn!(remaining = report.remaining, "Shutting down with writes pending sync");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Final flush failed"),
        }
        info!("Cafe sync shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &tempfile::TempDir) -> CafeSyncConfig {
        CafeSyncConfig {
            local_store_path: dir.path().join("mirror.sqlite").to_string_lossy().into_owned(),
            ..CafeSyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_from_config_without_remote_url() {
        let dir = tempdir().unwrap();
        let sync = CafeSync::from_config(&config(&dir)).await.unwrap();

        let status = sync.sync_status().await.unwrap();
        assert!(status.remote.is_healthy);
        assert_eq!(status.queue.pending_groups, 0);
        assert!(dir.path().join("mirror.sqlite").exists());
    }

    #[tokio::test]
    async fn test_flush_ticker_stops_on_shutdown() {
        let dir = tempdir().unwrap();
        let sync = Arc::new(CafeSync::from_config(&config(&dir)).await.unwrap());
        let (tx, rx) = watch::channel(false);

        let handle = sync.spawn_flush_ticker(Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("ticker did not stop")
            .unwrap();
    }
}
