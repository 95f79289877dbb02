//! # Cafe Sync
//!
//! Offline-first order sync for a café point-of-sale.
//!
//! ## Architecture
//!
//! The remote (PostgREST) store is the source of truth. A local SQLite file
//! mirrors what the till needs to keep working while the network is down,
//! and holds a durable queue of writes waiting to be replayed:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     HTTP surface (axum)                     │
//! │  • orders, tickets, prep queue, products, sync status      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  CafeSync (orchestrator)                    │
//! │  • flush queue first, then read or write                   │
//! │  • HealthTracker decides remote vs local                   │
//! └─────────────────────────────────────────────────────────────┘
//!              │                                │
//!     (network error → fallback)        (operation groups)
//!              ▼                                ▼
//! ┌──────────────────────────┐    ┌─────────────────────────────┐
//! │   Local mirror (SQLite)  │    │   Remote store (PostgREST)  │
//! │  • mirrored rows         │    │  • authoritative tables     │
//! │  • pending_operations    │───▶│  • replayed in FIFO order   │
//! │  • dead_operations       │    │                             │
//! └──────────────────────────┘    └─────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cafe_sync::{CafeSync, CafeSyncConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = CafeSyncConfig::from_env().expect("bad configuration");
//!     let sync = CafeSync::from_config(&config).await.expect("Failed to start");
//!
//!     let menu = sync.list_products().await.expect("menu unavailable");
//!     println!("{} products (from {})", menu.value.len(), menu.source);
//!
//!     sync.shutdown().await;
//! }
//! ```
//!
//! ## Failure Handling
//!
//! - **Network errors** (refused, timeout, gateway 502/503/504): reads fall
//!   back to the mirror, writes are queued and reported as `pendingSync`.
//! - **Validation errors** (constraint violations, bad payloads): returned to
//!   the caller, never queued.
//! - **Replay failures** that are not network errors move the group to a
//!   dead-letter table so the queue keeps moving.
//!
//! ## Modules
//!
//! - [`coordinator`]: [`CafeSync`], the read/write orchestrator
//! - [`storage`]: remote adapters (PostgREST, memory) and the local mirror
//! - [`resilience`]: health tracking, the pending queue, startup retry
//! - [`operation`]: replayable operation groups
//! - [`model`]: order, ticket and catalog rows
//! - [`server`]: axum routes and response envelope

pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod model;
pub mod operation;
pub mod resilience;
pub mod server;
pub mod storage;

pub use config::{CafeSyncConfig, ConfigError, TableNames};
pub use coordinator::{CafeSync, DataSource, Sourced, SyncStatus, WriteStatus, Written};
pub use error::SyncError;
pub use metrics::LatencyTimer;
pub use operation::{OperationGroup, PendingOperation, Table};
pub use resilience::health::{HealthSnapshot, HealthTracker};
pub use resilience::queue::{DeadLetter, FlushReport, PendingQueue, QueueId, QueueStats};
pub use resilience::retry::RetryConfig;
pub use storage::local::LocalMirrorStore;
pub use storage::memory::MemoryRemote;
pub use storage::postgrest::PostgrestStore;
pub use storage::traits::{Record, RemoteError, RemoteStore, StorageError};
