use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error code, when one applies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

/// Domain-level errors produced by services and gateways.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Courier error: {0}")]
    CourierError(String),

    #[error("Payment error: {0}")]
    PaymentError(String),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Could not allocate a unique order number after {0} attempts")]
    OrderNumberExhausted(u32),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidOperation(_) => StatusCode::CONFLICT,
            ServiceError::CourierError(_) | ServiceError::PaymentError(_) => {
                StatusCode::BAD_GATEWAY
            }
            ServiceError::EmailError(_)
            | ServiceError::DatabaseError(_)
            | ServiceError::OrderNumberExhausted(_)
            | ServiceError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            ServiceError::ValidationError(_) => Some("VALIDATION_FAILED"),
            ServiceError::CourierError(_) => Some("COURIER_UNAVAILABLE"),
            ServiceError::PaymentError(_) => Some("PAYMENT_FAILED"),
            ServiceError::OrderNumberExhausted(_) => Some("ORDER_NUMBER_EXHAUSTED"),
            _ => None,
        }
    }

    /// Message exposed to API clients. Carries the underlying error text so
    /// the storefront can surface it in a toast.
    pub fn response_message(&self) -> String {
        self.to_string()
    }
}

/// HTTP-level errors returned by axum handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {message}")]
    BadRequest {
        message: String,
        error_code: Option<String>,
    },

    #[error("Internal server error")]
    InternalServerError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match &self {
            ApiError::ServiceError(service_error) => (
                service_error.status_code(),
                service_error.response_message(),
                service_error.error_code().map(str::to_string),
            ),
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                msg.clone(),
                Some("VALIDATION_FAILED".to_string()),
            ),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
            ApiError::BadRequest {
                message,
                error_code,
            } => (StatusCode::BAD_REQUEST, message.clone(), error_code.clone()),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            message,
            code,
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
