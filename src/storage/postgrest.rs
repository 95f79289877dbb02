// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Supabase / PostgREST adapter.
//!
//! Talks to `{base_url}/rest/v1/{table}` and turns every failure into a
//! structured [`RemoteError`]. Classification happens here, once:
//!
//! | Failure                                       | Variant      |
//! |-----------------------------------------------|--------------|
//! | connect, DNS, timeout, request/body transport | `Network`    |
//! | HTTP 408, 429, 502, 503, 504                  | `Network`    |
//! | other 4xx (PostgREST / SQLSTATE error body)   | `Validation` |
//! | anything else                                 | `Unknown`    |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::query::{Filter, Query};
use super::traits::{Record, RemoteError, RemoteStore};
use crate::metrics::{self, LatencyTimer};

pub struct PostgrestStore {
    client: Client,
    base_url: String,
    key: Option<String>,
}

/// Error body returned by PostgREST.
#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl PostgrestStore {
    pub fn new(base_url: impl Into<String>, key: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Unknown(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key,
        })
    }

    fn endpoint(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let mut builder = self.client.request(method, self.endpoint(table));
        if let Some(key) = &self.key {
            builder = builder.header("apikey", key).bearer_auth(key);
        }
        builder
    }

    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let _timer = LatencyTimer::new("remote", operation);
        let result = match builder.send().await {
            Ok(response) if response.status().is_success() => Ok(response),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(classify_response(status, &body))
            }
            Err(e) => Err(classify_transport(&e)),
        };
        metrics::record_remote_call(operation, outcome(&result));
        result
    }

    async fn execute(&self, operation: &'static str, builder: RequestBuilder, prefer: &str) -> Result<(), RemoteError> {
        self.send(operation, builder.header("Prefer", prefer)).await?;
        Ok(())
    }
}

fn outcome<T>(result: &Result<T, RemoteError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(RemoteError::Network(_)) => "network",
        Err(RemoteError::Validation { .. }) => "validation",
        Err(RemoteError::Unknown(_)) => "unknown",
    }
}

fn filter_params(filter: &[Filter]) -> Vec<(String, String)> {
    filter.iter().map(Filter::to_param).collect()
}

/// Classify a transport-level failure.
pub fn classify_transport(e: &reqwest::Error) -> RemoteError {
    if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
        RemoteError::Network(e.to_string())
    } else {
        RemoteError::Unknown(e.to_string())
    }
}

/// Classify a non-success HTTP response from its status and body.
pub fn classify_response(status: StatusCode, body: &str) -> RemoteError {
    match status.as_u16() {
        408 | 429 | 502 | 503 | 504 => RemoteError::Network(format!("HTTP {status}")),
        400..=499 => {
            let parsed: Option<PostgrestErrorBody> = serde_json::from_str(body).ok();
            let code = parsed
                .as_ref()
                .and_then(|b| b.code.clone())
                .unwrap_or_else(|| status.as_u16().to_string());
            let message = parsed
                .map(|b| match (b.message, b.details) {
                    (Some(m), Some(d)) => format!("{m} ({d})"),
                    (Some(m), None) => m,
                    (None, Some(d)) => d,
                    (None, None) => body.to_string(),
                })
                .unwrap_or_else(|| body.to_string());
            RemoteError::Validation { code, message }
        }
        _ => RemoteError::Unknown(format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    async fn select(&self, query: &Query) -> Result<Vec<Record>, RemoteError> {
        debug!(table = %query.table, "Remote select");
        let builder = self.request(Method::GET, &query.table).query(&query.to_params());
        let response = self.send("select", builder).await?;
        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| classify_transport(&e))
    }

    async fn insert(&self, table: &str, rows: &[Record]) -> Result<(), RemoteError> {
        let builder = self.request(Method::POST, table).json(rows);
        self.execute("insert", builder, "return=minimal").await
    }

    async fn update(&self, table: &str, values: &Record, filter: &[Filter]) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::PATCH, table)
            .query(&filter_params(filter))
            .json(values);
        self.execute("update", builder, "return=minimal").await
    }

    async fn upsert(&self, table: &str, rows: &[Record], on_conflict: &str) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::POST, table)
            .query(&[("on_conflict", on_conflict)])
            .json(rows);
        self.execute("upsert", builder, "resolution=merge-duplicates,return=minimal").await
    }

    async fn delete(&self, table: &str, filter: &[Filter]) -> Result<(), RemoteError> {
        let builder = self.request(Method::DELETE, table).query(&filter_params(filter));
        self.execute("delete", builder, "return=minimal").await
    }
}
