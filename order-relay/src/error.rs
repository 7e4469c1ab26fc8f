//! Pipeline error type
//!
//! `PipelineError` is what the ingestion, validation, scheduling, and export
//! code returns. The API layer converts it into [`AppError`] so handlers can
//! use `?` without hand-mapping every failure.

use std::fmt;

use axum::response::IntoResponse;
use shared::error::{AppError, ErrorCode};
use thiserror::Error;

use crate::db::StoreError;

/// What a lookup failed to find, scoped to the caller's merchant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Order(i64),
    Exception(i64),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Order(id) => write!(f, "order {id}"),
            Self::Exception(id) => write!(f, "exception {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing or invalid webhook signature
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("{0} not found")]
    NotFound(Missing),

    /// Platform or fulfillment call failed (transport, status, or body)
    #[error("external call failed: {0}")]
    ExternalCall(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Request is well-formed but the order is in the wrong state for it
    #[error("{0}")]
    InvalidState(String),

    #[error("order {0} was cancelled on the platform")]
    OrderCancelled(i64),

    #[error("order {0} has already been exported")]
    AlreadyExported(i64),

    #[error("exception {0} is already resolved")]
    ExceptionResolved(i64),

    #[error("{0}")]
    Invalid(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PipelineError::ExternalCall(format!("timed out: {e}"))
        } else {
            PipelineError::ExternalCall(e.to_string())
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Authentication(msg) => {
                AppError::with_message(ErrorCode::SignatureInvalid, msg)
            }
            PipelineError::NotFound(missing) => {
                let message = format!("{missing} not found");
                match missing {
                    Missing::Order(id) => AppError::with_message(ErrorCode::OrderNotFound, message)
                        .with_detail("order_id", id),
                    Missing::Exception(id) => {
                        AppError::with_message(ErrorCode::ExceptionNotFound, message)
                            .with_detail("exception_id", id)
                    }
                }
            }
            PipelineError::InvalidState(msg) => AppError::invalid_state(msg),
            e @ PipelineError::OrderCancelled(id) => {
                AppError::with_message(ErrorCode::OrderCancelled, e.to_string())
                    .with_detail("order_id", id)
            }
            e @ PipelineError::AlreadyExported(id) => {
                AppError::with_message(ErrorCode::OrderAlreadyExported, e.to_string())
                    .with_detail("order_id", id)
            }
            e @ PipelineError::ExceptionResolved(id) => {
                AppError::with_message(ErrorCode::ExceptionAlreadyResolved, e.to_string())
                    .with_detail("exception_id", id)
            }
            PipelineError::Invalid(msg) => AppError::validation(msg),
            PipelineError::ExternalCall(msg) => {
                tracing::warn!(error = %msg, "External call failed");
                AppError::with_message(ErrorCode::ExternalServiceError, msg)
            }
            PipelineError::Configuration(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                AppError::with_message(ErrorCode::ConfigError, msg)
            }
            PipelineError::Store(err) => {
                tracing::error!(error = %err, "Store error");
                AppError::new(ErrorCode::DatabaseError)
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        PipelineError::Store(e).into()
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> axum::response::Response {
        let app_error: AppError = self.into();
        app_error.into_response()
    }
}
