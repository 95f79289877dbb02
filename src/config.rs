// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration, resolved once at start-up.
//!
//! # Example
//!
//! ```
//! use cafe_sync::CafeSyncConfig;
//!
//! // Zero configuration: in-memory remote, local mirror in the working dir.
//! let config = CafeSyncConfig::default();
//! assert_eq!(config.tables.orders, "orders");
//! assert_eq!(config.local_store_path, "./cafe-sync.sqlite");
//!
//! // From an arbitrary lookup (the binary uses the process environment).
//! let config = CafeSyncConfig::from_lookup(|key| match key {
//!     "SUPABASE_ORDERS_TABLE" => Some("pos_orders".to_string()),
//!     "PORT" => Some("8080".to_string()),
//!     _ => None,
//! })
//! .unwrap();
//! assert_eq!(config.tables.orders, "pos_orders");
//! assert_eq!(config.port, 8080);
//! ```

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::operation::Table;

#[derive(Error, Debug)]
#[error("invalid value for {key}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub reason: String,
}

/// Physical names of the remote tables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TableNames {
    #[serde(default = "default_orders")]
    pub orders: String,
    #[serde(default = "default_order_items")]
    pub order_items: String,
    #[serde(default = "default_tickets")]
    pub tickets: String,
    #[serde(default = "default_products")]
    pub products: String,
    #[serde(default = "default_users")]
    pub users: String,
    #[serde(default = "default_prep_queue")]
    pub prep_queue: String,
    #[serde(default = "default_order_codes")]
    pub order_codes: String,
}

fn default_orders() -> String { "orders".into() }
fn default_order_items() -> String { "order_items".into() }
fn default_tickets() -> String { "tickets".into() }
fn default_products() -> String { "products".into() }
fn default_users() -> String { "users".into() }
fn default_prep_queue() -> String { "prep_queue".into() }
fn default_order_codes() -> String { "order_codes".into() }

impl Default for TableNames {
    fn default() -> Self {
        Self {
            orders: default_orders(),
            order_items: default_order_items(),
            tickets: default_tickets(),
            products: default_products(),
            users: default_users(),
            prep_queue: default_prep_queue(),
            order_codes: default_order_codes(),
        }
    }
}

impl TableNames {
    #[must_use]
    pub fn resolve(&self, table: Table) -> &str {
        match table {
            Table::Orders => &self.orders,
            Table::OrderItems => &self.order_items,
            Table::Tickets => &self.tickets,
            Table::Products => &self.products,
            Table::Users => &self.users,
            Table::PrepQueue => &self.prep_queue,
            Table::OrderCodes => &self.order_codes,
        }
    }

    fn env_key(table: Table) -> &'static str {
        match table {
            Table::Orders => "SUPABASE_ORDERS_TABLE",
            Table::OrderItems => "SUPABASE_ORDER_ITEMS_TABLE",
            Table::Tickets => "SUPABASE_TICKETS_TABLE",
            Table::Products => "SUPABASE_PRODUCTS_TABLE",
            Table::Users => "SUPABASE_USERS_TABLE",
            Table::PrepQueue => "SUPABASE_PREP_QUEUE_TABLE",
            Table::OrderCodes => "SUPABASE_ORDER_CODES_TABLE",
        }
    }

    fn slot(&mut self, table: Table) -> &mut String {
        match table {
            Table::Orders => &mut self.orders,
            Table::OrderItems => &mut self.order_items,
            Table::Tickets => &mut self.tickets,
            Table::Products => &mut self.products,
            Table::Users => &mut self.users,
            Table::PrepQueue => &mut self.prep_queue,
            Table::OrderCodes => &mut self.order_codes,
        }
    }
}

const ALL_TABLES: [Table; 7] = [
    Table::Orders,
    Table::OrderItems,
    Table::Tickets,
    Table::Products,
    Table::Users,
    Table::PrepQueue,
    Table::OrderCodes,
];

#[derive(Debug, Clone, Deserialize)]
pub struct CafeSyncConfig {
    /// Supabase project URL; `None` runs against the in-memory remote.
    #[serde(default)]
    pub supabase_url: Option<String>,

    /// Service-role (or anon) key sent as `apikey` and bearer token.
    #[serde(default)]
    pub supabase_key: Option<String>,

    #[serde(default)]
    pub tables: TableNames,

    /// SQLite file for the local mirror and the pending queue.
    #[serde(default = "default_local_store_path")]
    pub local_store_path: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Per-request timeout for the remote HTTP client.
    #[serde(default = "default_remote_timeout_ms")]
    pub remote_timeout_ms: u64,

    /// After a network failure, skip remote attempts for this long (0 = never skip).
    #[serde(default)]
    pub remote_retry_cooldown_ms: u64,

    /// Background queue flush period in seconds (0 = flush on request only).
    #[serde(default)]
    pub flush_interval_secs: u64,
}

fn default_local_store_path() -> String { "./cafe-sync.sqlite".into() }
fn default_port() -> u16 { 3000 }
fn default_remote_timeout_ms() -> u64 { 8_000 }

impl Default for CafeSyncConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            tables: TableNames::default(),
            local_store_path: default_local_store_path(),
            port: default_port(),
            remote_timeout_ms: default_remote_timeout_ms(),
            remote_retry_cooldown_ms: 0,
            flush_interval_secs: 0,
        }
    }
}

impl CafeSyncConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from any key lookup. Unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        config.supabase_url = get("SUPABASE_URL").map(|u| u.trim_end_matches('/').to_string());
        config.supabase_key = get("SUPABASE_SERVICE_ROLE_KEY").or_else(|| get("SUPABASE_ANON_KEY"));

        for table in ALL_TABLES {
            if let Some(name) = get(TableNames::env_key(table)) {
                info!(table = %table, alias = %name, "Using table alias");
                *config.tables.slot(table) = name;
            }
        }

        if let Some(path) = get("LOCAL_STORE_PATH") {
            config.local_store_path = path;
        }
        config.port = parse_or("PORT", get("PORT"), config.port)?;
        config.remote_timeout_ms = parse_or("REMOTE_TIMEOUT_MS", get("REMOTE_TIMEOUT_MS"), config.remote_timeout_ms)?;
        config.remote_retry_cooldown_ms = parse_or(
            "REMOTE_RETRY_COOLDOWN_MS",
            get("REMOTE_RETRY_COOLDOWN_MS"),
            config.remote_retry_cooldown_ms,
        )?;
        config.flush_interval_secs =
            parse_or("FLUSH_INTERVAL_SECS", get("FLUSH_INTERVAL_SECS"), config.flush_interval_secs)?;

        Ok(config)
    }

    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    #[must_use]
    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.remote_retry_cooldown_ms)
    }

    #[must_use]
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_interval_secs > 0).then(|| Duration::from_secs(self.flush_interval_secs))
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError {
            key: key.to_string(),
            reason: e.to_string(),
        }),
    }
}
