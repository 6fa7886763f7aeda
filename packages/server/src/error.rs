use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::storage::StorageError;
use mq::MqError;
use sea_orm::DbErr;
use serde::Serialize;
use worker::csv::ExportError;

/// Structured error response returned by all endpoints on failure.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// One of: `VALIDATION_ERROR`, `NOT_FOUND`, `CONFLICT`, `UNAVAILABLE`,
    /// `INTERNAL_ERROR`.
    #[schema(value_type = String, example = "NOT_FOUND")]
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    /// The record is in a state that does not allow the action.
    Conflict(String),
    /// A backend (queue, object storage) is not configured or unreachable.
    Unavailable(String),
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_body(self) -> ErrorBody {
        match self {
            AppError::Validation(message) => ErrorBody {
                code: "VALIDATION_ERROR",
                message,
            },
            AppError::NotFound(message) => ErrorBody {
                code: "NOT_FOUND",
                message,
            },
            AppError::Conflict(message) => ErrorBody {
                code: "CONFLICT",
                message,
            },
            AppError::Unavailable(detail) => {
                tracing::warn!("Backend unavailable: {}", detail);
                ErrorBody {
                    code: "UNAVAILABLE",
                    message: detail,
                }
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                ErrorBody {
                    code: "INTERNAL_ERROR",
                    message: "An unexpected error occurred".into(),
                }
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.into_body())).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("Object '{key}' not found")),
            StorageError::InvalidKey(key) => AppError::Validation(format!("Invalid key '{key}'")),
            StorageError::Unavailable(msg) => AppError::Unavailable(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<MqError> for AppError {
    fn from(err: MqError) -> Self {
        AppError::Unavailable(format!("Job queue: {err}"))
    }
}

impl From<ExportError> for AppError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Storage(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}
