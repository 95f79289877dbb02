// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use super::routes::Envelope;
use crate::error::SyncError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Sync(SyncError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Sync(SyncError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Sync(SyncError::Unavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Sync(SyncError::Remote(_) | SyncError::Local(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(Envelope::<()>::failure(self.to_string()))).into_response()
    }
}

/// Failure to bring the HTTP server up.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Startup failed: {0}")]
    Startup(#[from] SyncError),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(std::io::Error),
}
