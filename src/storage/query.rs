// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Filter composition for remote reads and writes.
//!
//! Mirrors the PostgREST builder surface (`eq`, `in`, `or`, `order`, `limit`).
//! Filters are serializable because update/delete operations carry them into
//! the pending queue.
//!
//! ```
//! use cafe_sync::storage::query::{Filter, Query};
//!
//! let query = Query::from("orders")
//!     .in_("status", ["pending", "preparing"])
//!     .order("created_at", false)
//!     .limit(20);
//!
//! assert_eq!(query.filters.len(), 1);
//! assert_eq!(query.limit, Some(20));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    Or { any: Vec<Filter> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn in_<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn or(any: Vec<Filter>) -> Self {
        Self::Or { any }
    }

    /// Evaluate against an in-memory row.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Eq { column, value } => {
                values_equal(record.get(column).unwrap_or(&Value::Null), value)
            }
            Self::In { column, values } => {
                let actual = record.get(column).unwrap_or(&Value::Null);
                values.iter().any(|v| values_equal(actual, v))
            }
            Self::Or { any } => any.iter().any(|f| f.matches(record)),
        }
    }

    /// Render as a PostgREST query parameter.
    #[must_use]
    pub fn to_param(&self) -> (String, String) {
        match self {
            Self::Eq { column, value } => (column.clone(), eq_operand(value, false)),
            Self::In { column, values } => (column.clone(), in_operand(values)),
            Self::Or { any } => ("or".to_string(), format!("({})", or_operands(any))),
        }
    }

    fn to_nested(&self) -> String {
        match self {
            Self::Eq { column, value } => format!("{}.{}", column, eq_operand(value, true)),
            Self::In { column, values } => format!("{}.{}", column, in_operand(values)),
            Self::Or { any } => format!("or({})", or_operands(any)),
        }
    }
}

fn or_operands(any: &[Filter]) -> String {
    any.iter().map(Filter::to_nested).collect::<Vec<_>>().join(",")
}

fn eq_operand(value: &Value, nested: bool) -> String {
    match value {
        Value::Null => "is.null".to_string(),
        Value::String(s) if nested => format!("eq.{}", quote(s)),
        _ => format!("eq.{}", literal(value)),
    }
}

fn in_operand(values: &[Value]) -> String {
    let inner: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::String(s) => quote(s),
            other => literal(other),
        })
        .collect();
    format!("in.({})", inner.join(","))
}

fn literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// JSON equality that treats `1` and `1.0` as the same number.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// A remote read.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub filters: Vec<Filter>,
    /// Column and ascending flag.
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(column, value));
        self
    }

    #[must_use]
    pub fn in_<V: Into<Value>>(mut self, column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::in_(column, values));
        self
    }

    #[must_use]
    pub fn or(mut self, any: Vec<Filter>) -> Self {
        self.filters.push(Filter::or(any));
        self
    }

    #[must_use]
    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// All query parameters, including `select`, `order` and `limit`.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if let Some((column, ascending)) = &self.order {
            let dir = if *ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{column}.{dir}")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_eq_matches_numbers_loosely() {
        let r = row(json!({"quantity": 2}));
        assert!(Filter::eq("quantity", 2.0).matches(&r));
        assert!(!Filter::eq("quantity", 3).matches(&r));
    }

    #[test]
    fn test_missing_column_matches_null() {
        let r = row(json!({"id": "a"}));
        assert!(Filter::eq("notes", Value::Null).matches(&r));
    }

    #[test]
    fn test_in_and_or() {
        let r = row(json!({"status": "ready", "id": "o1"}));
        assert!(Filter::in_("status", ["pending", "ready"]).matches(&r));
        assert!(Filter::or(vec![Filter::eq("id", "x"), Filter::eq("status", "ready")]).matches(&r));
        assert!(!Filter::or(vec![Filter::eq("id", "x"), Filter::eq("status", "done")]).matches(&r));
    }

    #[test]
    fn test_postgrest_params() {
        let q = Query::from("orders")
            .eq("id", "o1")
            .in_("status", ["pending", "ready"])
            .or(vec![Filter::eq("code", "AB12"), Filter::eq("user_id", Value::Null)])
            .order("created_at", false)
            .limit(5);

        let params = q.to_params();
        assert_eq!(params[0], ("select".into(), "*".into()));
        assert_eq!(params[1], ("id".into(), "eq.o1".into()));
        assert_eq!(params[2], ("status".into(), "in.(\"pending\",\"ready\")".into()));
        assert_eq!(params[3], ("or".into(), "(code.eq.\"AB12\",user_id.is.null)".into()));
        assert_eq!(params[4], ("order".into(), "created_at.desc".into()));
        assert_eq!(params[5], ("limit".into(), "5".into()));
    }

    #[test]
    fn test_filter_serde_shape() {
        let f = Filter::eq("order_id", "o1");
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v, json!({"op": "eq", "column": "order_id", "value": "o1"}));
        let back: Filter = serde_json::from_value(v).unwrap();
        assert_eq!(back, f);
    }
}
