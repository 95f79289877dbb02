// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process remote store.
//!
//! Used when no `SUPABASE_URL` is configured and as the remote in tests.
//! Honours `on_conflict` upserts and per-table unique columns, and can be
//! switched offline to simulate a connection refusal.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use super::query::{values_equal, Filter, Query};
use super::traits::{Record, RemoteError, RemoteStore};

pub struct MemoryRemote {
    tables: DashMap<String, Vec<Record>>,
    unique: DashMap<String, HashSet<String>>,
    offline: AtomicBool,
    journal: Mutex<Vec<String>>,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            unique: DashMap::new(),
            offline: AtomicBool::new(false),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Declare a unique column; duplicate writes fail with SQLSTATE `23505`.
    #[must_use]
    pub fn with_unique(self, table: &str, column: &str) -> Self {
        self.unique
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
        self
    }

    /// While offline every call fails as a refused connection.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// Rows currently in `table`, in insertion order.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.tables.get(table).map(|r| r.value().clone()).unwrap_or_default()
    }

    /// Successful mutations as `"kind:table"`, oldest first.
    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().clone()
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.is_offline() {
            return Err(RemoteError::Network(
                "connect ECONNREFUSED 127.0.0.1:54321".to_string(),
            ));
        }
        Ok(())
    }

    fn record(&self, kind: &str, table: &str) {
        self.journal.lock().push(format!("{kind}:{table}"));
    }

    /// Reject `candidate` if it collides on a unique column with any row
    /// other than the one at `skip`.
    fn check_unique(
        &self,
        table: &str,
        rows: &[Record],
        candidate: &Record,
        skip: Option<usize>,
    ) -> Result<(), RemoteError> {
        let Some(columns) = self.unique.get(table) else {
            return Ok(());
        };
        for column in columns.iter() {
            let Some(value) = candidate.get(column).filter(|v| !v.is_null()) else {
                continue;
            };
            let clash = rows.iter().enumerate().any(|(i, row)| {
                Some(i) != skip && row.get(column).is_some_and(|v| values_equal(v, value))
            });
            if clash {
                return Err(RemoteError::validation(
                    "23505",
                    format!("duplicate key value violates unique constraint \"{table}_{column}_key\""),
                ));
            }
        }
        Ok(())
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_all(filter: &[Filter], row: &Record) -> bool {
    filter.iter().all(|f| f.matches(row))
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering::*;
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Equal,
        // Postgres sorts NULLs last in ascending order.
        (None | Some(Value::Null), _) => Greater,
        (_, None | Some(Value::Null)) => Less,
        _ => Equal,
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn select(&self, query: &Query) -> Result<Vec<Record>, RemoteError> {
        self.check_online()?;
        let mut rows: Vec<Record> = self
            .tables
            .get(&query.table)
            .map(|t| {
                t.iter()
                    .filter(|row| matches_all(&query.filters, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((column, ascending)) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(column), b.get(column));
                if *ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, rows: &[Record]) -> Result<(), RemoteError> {
        self.check_online()?;
        let mut existing = self.tables.entry(table.to_string()).or_default();
        // Validate the whole statement first so a failure inserts nothing.
        let mut staged = existing.clone();
        for row in rows {
            self.check_unique(table, &staged, row, None)?;
            staged.push(row.clone());
        }
        *existing = staged;
        drop(existing);
        self.record("insert", table);
        Ok(())
    }

    async fn update(&self, table: &str, values: &Record, filter: &[Filter]) -> Result<(), RemoteError> {
        self.check_online()?;
        let mut existing = self.tables.entry(table.to_string()).or_default();
        let mut staged = existing.clone();
        for i in 0..staged.len() {
            if !matches_all(filter, &staged[i]) {
                continue;
            }
            let mut updated = staged[i].clone();
            for (k, v) in values {
                updated.insert(k.clone(), v.clone());
            }
            self.check_unique(table, &staged, &updated, Some(i))?;
            staged[i] = updated;
        }
        *existing = staged;
        drop(existing);
        self.record("update", table);
        Ok(())
    }

    async fn upsert(&self, table: &str, rows: &[Record], on_conflict: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        let mut existing = self.tables.entry(table.to_string()).or_default();
        let mut staged = existing.clone();
        for row in rows {
            let key = row.get(on_conflict).ok_or_else(|| {
                RemoteError::validation(
                    "42P10",
                    format!("upsert row for {table} is missing conflict column {on_conflict}"),
                )
            })?;
            let position = staged
                .iter()
                .position(|r| r.get(on_conflict).is_some_and(|v| values_equal(v, key)));
            match position {
                Some(i) => {
                    let mut merged = staged[i].clone();
                    for (k, v) in row {
                        merged.insert(k.clone(), v.clone());
                    }
                    self.check_unique(table, &staged, &merged, Some(i))?;
                    staged[i] = merged;
                }
                None => {
                    self.check_unique(table, &staged, row, None)?;
                    staged.push(row.clone());
                }
            }
        }
        *existing = staged;
        drop(existing);
        self.record("upsert", table);
        Ok(())
    }

    async fn delete(&self, table: &str, filter: &[Filter]) -> Result<(), RemoteError> {
        self.check_online()?;
        if let Some(mut rows) = self.tables.get_mut(table) {
            rows.retain(|row| !matches_all(filter, row));
        }
        self.record("delete", table);
        Ok(())
    }
}
