// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local mirror store backed by a single SQLite file.
//!
//! Holds a reduced copy of the remote schema plus the pending-operation queue.
//! Statements use `:name` placeholders bound from a JSON map:
//!
//! ```sql
//! SELECT data FROM orders WHERE status = :status ORDER BY created_at DESC LIMIT :limit
//! ```
//!
//! Every mirrored table keeps the full row snapshot in a `data` TEXT column
//! next to the few columns reads filter on.

use std::path::Path;
use std::time::Duration;

use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, info};

use super::traits::{Record, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

/// Named statement parameters.
pub type Params = Map<String, Value>;

/// Build a [`Params`] map inline.
///
/// ```
/// use cafe_sync::params;
/// let p = params! { "id" => "o1", "limit" => 10 };
/// assert_eq!(p["limit"], 10);
/// ```
#[macro_export]
macro_rules! params {
    () => { $crate::storage::local::Params::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut p = $crate::storage::local::Params::new();
        $( p.insert(($key).to_string(), ::serde_json::json!($value)); )+
        p
    }};
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS orders (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders (status, created_at)",
    "CREATE TABLE IF NOT EXISTS order_items (
        order_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        data TEXT NOT NULL,
        PRIMARY KEY (order_id, position)
    )",
    "CREATE TABLE IF NOT EXISTS tickets (
        id TEXT PRIMARY KEY,
        order_id TEXT NOT NULL,
        ticket_number TEXT NOT NULL,
        status TEXT NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_tickets_order ON tickets (order_id)",
    "CREATE INDEX IF NOT EXISTS idx_tickets_number ON tickets (ticket_number)",
    "CREATE TABLE IF NOT EXISTS order_codes (
        code TEXT PRIMARY KEY,
        order_id TEXT NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_order_codes_order ON order_codes (order_id)",
    "CREATE TABLE IF NOT EXISTS products (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        data TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS users_shadow (
        id TEXT PRIMARY KEY,
        data TEXT NOT NULL
    )",
    // AUTOINCREMENT: queue ids must never be reused after a flush deletes rows.
    "CREATE TABLE IF NOT EXISTS pending_operations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        label TEXT NOT NULL,
        operations TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS dead_operations (
        id INTEGER PRIMARY KEY,
        label TEXT NOT NULL,
        operations TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        failed_at INTEGER NOT NULL,
        failed_index INTEGER,
        error TEXT NOT NULL
    )",
];

/// Outcome of one statement in a [`LocalMirrorStore::batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executed {
    pub rows_affected: u64,
    /// Only meaningful for `INSERT` statements.
    pub last_insert_id: i64,
}

pub struct LocalMirrorStore {
    pool: SqlitePool,
    path: String,
}

impl LocalMirrorStore {
    /// Open (creating if needed) the store at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Opening local mirror store");

        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = retry("local_open", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                SqlitePoolOptions::new()
                    .max_connections(8)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options)
                    .await
                    .map_err(StorageError::from)
            }
        })
        .await?;

        let store = Self { pool, path: path_str };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        for statement in SCHEMA {
            self.exec(statement).await?;
        }
        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute a schema or maintenance statement without parameters.
    pub async fn exec(&self, sql: &str) -> Result<(), StorageError> {
        sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn run(&self, sql: &str, params: &Params) -> Result<u64, StorageError> {
        let (sql, values) = bind_named(sql, params)?;
        let result = bind_values(sqlx::query(&sql), values).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Execute a statement and return its last inserted rowid.
    pub async fn insert(&self, sql: &str, params: &Params) -> Result<i64, StorageError> {
        let (sql, values) = bind_named(sql, params)?;
        let result = bind_values(sqlx::query(&sql), values).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn all(&self, sql: &str, params: &Params) -> Result<Vec<Record>, StorageError> {
        let (sql, values) = bind_named(sql, params)?;
        let rows = bind_values(sqlx::query(&sql), values).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    pub async fn get(&self, sql: &str, params: &Params) -> Result<Option<Record>, StorageError> {
        let (sql, values) = bind_named(sql, params)?;
        let row = bind_values(sqlx::query(&sql), values).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    /// Run several statements in one transaction.
    pub async fn batch(&self, statements: &[(&str, Params)]) -> Result<Vec<Executed>, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(statements.len());
        for (sql, params) in statements {
            let (sql, values) = bind_named(sql, params)?;
            let result = bind_values(sqlx::query(&sql), values).execute(&mut *tx).await?;
            results.push(Executed {
                rows_affected: result.rows_affected(),
                last_insert_id: result.last_insert_rowid(),
            });
        }
        tx.commit().await?;
        debug!(statements = statements.len(), "Local batch committed");
        Ok(results)
    }
}

/// Rewrite `:name` placeholders to positional `?` and collect the values in
/// placeholder order. Text inside single-quoted literals is left alone.
pub(crate) fn bind_named(sql: &str, params: &Params) -> Result<(String, Vec<Value>), StorageError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut in_literal = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            in_literal = !in_literal;
            out.push(c);
            i += 1;
            continue;
        }
        let starts_name = chars
            .get(i + 1)
            .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_');
        if !in_literal && c == ':' && starts_name {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            let value = params
                .get(&name)
                .ok_or_else(|| StorageError::Backend(format!("missing statement parameter :{name}")))?;
            values.push(value.clone());
            out.push('?');
            i = end;
            continue;
        }
        out.push(c);
        i += 1;
    }

    Ok((out, values))
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: Vec<Value>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(i64::from(b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => query.bind(s),
            other => query.bind(other.to_string()),
        };
    }
    query
}

fn row_to_record(row: &SqliteRow) -> Result<Record, StorageError> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let (is_null, type_name) = {
            let raw = row.try_get_raw(idx)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };
        let value = if is_null {
            Value::Null
        } else {
            match type_name.as_str() {
                "INTEGER" => Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" => Value::from(row.try_get::<f64, _>(idx)?),
                "BLOB" => Value::from(
                    String::from_utf8_lossy(&row.try_get::<Vec<u8>, _>(idx)?).into_owned(),
                ),
                _ => Value::from(row.try_get::<String, _>(idx)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}
