// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::ApiError;
use crate::coordinator::{CafeSync, DataSource, Sourced, SyncStatus, WriteStatus, Written};
use crate::model::{NewOrder, OrderQuery, OrderSnapshot, Product, StatusChange, Ticket, UserShadow};
use crate::resilience::queue::{DeadLetter, FlushReport, QueueId};

pub type AppState = Arc<CafeSync>;
type ApiResult<T> = Result<(StatusCode, Json<Envelope<T>>), ApiError>;

/// Response body for every route.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_sync: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<QueueId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DataSource>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            pending_sync: None,
            queue_id: None,
            source: None,
        }
    }

    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            pending_sync: None,
            queue_id: None,
            source: None,
        }
    }

    pub fn read(read: Sourced<T>) -> Self {
        Self {
            source: Some(read.source),
            ..Self::ok(read.value)
        }
    }

    pub fn written(written: Written<T>) -> Self {
        Self {
            pending_sync: Some(written.status.is_pending()),
            queue_id: written.status.queue_id(),
            ..Self::ok(written.value)
        }
    }
}

/// 202 only when the remote was tried and failed. A write queued without an
/// attempt reports the same status as a committed one.
fn write_status(status: &WriteStatus, success: StatusCode) -> StatusCode {
    match status {
        WriteStatus::Pending { remote_attempted: true, .. } => StatusCode::ACCEPTED,
        _ => success,
    }
}

fn read<T>(sourced: Sourced<T>) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(Envelope::read(sourced))))
}

fn written<T>(written: Written<T>, success: StatusCode) -> ApiResult<T> {
    let status = write_status(&written.status, success);
    Ok((status, Json(Envelope::written(written))))
}

pub async fn create_order(
    State(sync): State<AppState>,
    payload: Result<Json<NewOrder>, JsonRejection>,
) -> ApiResult<OrderSnapshot> {
    let Json(input) = payload?;
    written(sync.save_order(input).await?, StatusCode::CREATED)
}

pub async fn list_orders(
    State(sync): State<AppState>,
    query: Result<Query<OrderQuery>, QueryRejection>,
) -> ApiResult<Vec<OrderSnapshot>> {
    let Query(filter) = query?;
    read(sync.list_orders(filter).await?)
}

pub async fn get_order(State(sync): State<AppState>, Path(id): Path<String>) -> ApiResult<OrderSnapshot> {
    read(sync.get_order(&id).await?)
}

pub async fn update_order_status(
    State(sync): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> ApiResult<OrderSnapshot> {
    let Json(change) = payload?;
    written(sync.update_order_status(&id, change.status).await?, StatusCode::OK)
}

pub async fn delete_order(State(sync): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let deleted = sync.delete_order(&id).await?;
    written(
        Written {
            value: json!({ "id": id }),
            status: deleted.status,
        },
        StatusCode::OK,
    )
}

pub async fn order_by_code(State(sync): State<AppState>, Path(code): Path<String>) -> ApiResult<OrderSnapshot> {
    read(sync.find_order_by_code(&code).await?)
}

pub async fn get_ticket(State(sync): State<AppState>, Path(number): Path<String>) -> ApiResult<Ticket> {
    read(sync.get_ticket(&number).await?)
}

pub async fn prep_queue(State(sync): State<AppState>) -> ApiResult<Vec<OrderSnapshot>> {
    read(sync.prep_queue().await?)
}

pub async fn list_products(State(sync): State<AppState>) -> ApiResult<Vec<Product>> {
    read(sync.list_products().await?)
}

pub async fn get_product(State(sync): State<AppState>, Path(id): Path<String>) -> ApiResult<Product> {
    read(sync.get_product(&id).await?)
}

pub async fn get_user(State(sync): State<AppState>, Path(id): Path<String>) -> ApiResult<UserShadow> {
    read(sync.get_user(&id).await?)
}

pub async fn sync_status(State(sync): State<AppState>) -> ApiResult<SyncStatus> {
    Ok((StatusCode::OK, Json(Envelope::ok(sync.sync_status().await?))))
}

pub async fn flush(State(sync): State<AppState>) -> ApiResult<FlushReport> {
    Ok((StatusCode::OK, Json(Envelope::ok(sync.flush_pending().await?))))
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    #[serde(default = "default_dead_letter_limit")]
    pub limit: usize,
}

fn default_dead_letter_limit() -> usize {
    100
}

pub async fn dead_letters(
    State(sync): State<AppState>,
    query: Result<Query<DeadLetterQuery>, QueryRejection>,
) -> ApiResult<Vec<DeadLetter>> {
    let Query(query) = query?;
    Ok((StatusCode::OK, Json(Envelope::ok(sync.dead_letters(query.limit).await?))))
}

pub async fn requeue_dead_letter(State(sync): State<AppState>, Path(id): Path<QueueId>) -> ApiResult<Value> {
    let queue_id = sync.requeue_dead_letter(id).await?;
    Ok((StatusCode::OK, Json(Envelope::ok(json!({ "queueId": queue_id })))))
}

pub async fn discard_dead_letter(State(sync): State<AppState>, Path(id): Path<QueueId>) -> ApiResult<Value> {
    sync.discard_dead_letter(id).await?;
    Ok((StatusCode::OK, Json(Envelope::ok(json!({ "discarded": id })))))
}

pub async fn health(State(sync): State<AppState>) -> Json<Value> {
    let remote = sync.health().snapshot();
    Json(json!({
        "status": "ok",
        "remoteHealthy": remote.is_healthy,
        "consecutiveFailures": remote.consecutive_failures,
    }))
}
