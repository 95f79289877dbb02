// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use cafe_sync::server::start_server;
use cafe_sync::CafeSyncConfig;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config = CafeSyncConfig::from_env()?;
    info!(
        port = config.port,
        local_store = %config.local_store_path,
        flush_interval_secs = config.flush_interval_secs,
        "Configuration loaded"
    );

    if let Err(e) = start_server(config).await {
        error!(error = %e, "Server exited with error");
        return Err(e.into());
    }
    Ok(())
}
