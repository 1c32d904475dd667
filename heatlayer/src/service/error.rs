//! Service errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigFileError;
use crate::publish::MapServerError;
use crate::stage::{ErrorKind, PipelineError, RunRecord};
use crate::store::StoreError;

/// Errors that stop a service from starting or serving.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigFileError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        ServiceError::Pipeline(e.into())
    }
}

impl From<MapServerError> for ServiceError {
    fn from(e: MapServerError) -> Self {
        ServiceError::Pipeline(e.into())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// A failed request, rendered as `{code, message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn from_kind(kind: ErrorKind, message: String) -> Self {
        let status = match kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Connectivity => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::GeometryMismatch => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            code: kind.as_str(),
            message,
        }
    }

    /// Error response for a failed run, `None` if the run succeeded.
    pub fn from_record(record: &RunRecord) -> Option<Self> {
        let kind = record.error_kind?;
        Some(Self::from_kind(kind, record.error.clone().unwrap_or_default()))
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self::from_kind(e.kind(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                code: self.code,
                message: self.message,
            }),
        )
            .into_response()
    }
}
