// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP surface over [`CafeSync`].
//!
//! Every response uses the same envelope:
//!
//! ```json
//! { "success": true, "data": { ... }, "pendingSync": true, "queueId": 12, "source": "local" }
//! ```
//!
//! `pendingSync`/`queueId` appear on writes, `source` on reads.

pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header::CONTENT_TYPE, Method},
    routing::{delete, get, patch, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::CafeSyncConfig;
use crate::coordinator::CafeSync;
pub use error::{ApiError, ServerError};
use routes::*;

pub fn router(sync: Arc<CafeSync>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health))
        .route("/api/orders", post(create_order).get(list_orders))
        .route("/api/orders/code/:code", get(order_by_code))
        .route("/api/orders/:id", get(get_order).delete(delete_order))
        .route("/api/orders/:id/status", patch(update_order_status))
        .route("/api/tickets/:number", get(get_ticket))
        .route("/api/prep-queue", get(prep_queue))
        .route("/api/products", get(list_products))
        .route("/api/products/:id", get(get_product))
        .route("/api/users/:id", get(get_user))
        .route("/api/sync/status", get(sync_status))
        .route("/api/sync/flush", post(flush))
        .route("/api/sync/dead-letters", get(dead_letters))
        .route("/api/sync/dead-letters/:id", delete(discard_dead_letter))
        .route("/api/sync/dead-letters/:id/requeue", post(requeue_dead_letter))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(sync)
}

/// Build the orchestrator, serve until a shutdown signal, then stop the
/// background flush and make a final delivery attempt.
pub async fn start_server(config: CafeSyncConfig) -> Result<(), ServerError> {
    info!("Initializing state...");
    let sync = Arc::new(CafeSync::from_config(&config).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = config
        .flush_interval()
        .map(|period| sync.spawn_flush_ticker(period, shutdown_rx));

    let address = format!("0.0.0.0:{}", config.port);
    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind { address: address.clone(), source })?;
    info!("Server running on {address}");

    axum::serve(listener, router(Arc::clone(&sync)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ServerError::Serve)?;

    let _ = shutdown_tx.send(true);
    if let Some(ticker) = ticker {
        if let Err(e) = ticker.await {
            error!(error = %e, "Background flush task panicked");
        }
    }
    sync.shutdown().await;
    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
