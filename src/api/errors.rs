//! API Error Handling
//!
//! Engine errors mapped onto HTTP status codes, tagged with the request id.

use crate::errors::{DomainError, EngineError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine readable reason (`insufficient_balance`, `period_closed`, ...)
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    BadRequest(String),
    Engine(EngineError),
}

impl ApiError {
    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn engine(request_id: String, error: EngineError) -> Self {
        Self {
            kind: ApiErrorKind::Engine(error),
            request_id,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.kind {
            ApiErrorKind::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiErrorKind::Engine(e) => {
                let status = match e {
                    EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                    EngineError::Domain(
                        DomainError::RoomNotExist(_)
                        | DomainError::PeriodNotFound(_)
                        | DomainError::OrderNotFound(_)
                        | DomainError::UserNotFound(_)
                        | DomainError::WalletNotFound(_),
                    ) => StatusCode::NOT_FOUND,
                    EngineError::Domain(DomainError::BettingNotAllowed { .. }) => StatusCode::FORBIDDEN,
                    EngineError::Domain(_) => StatusCode::CONFLICT,
                    EngineError::Storage(_) | EngineError::Delivery(_) => StatusCode::SERVICE_UNAVAILABLE,
                    EngineError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.reason())
            }
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ApiErrorKind::BadRequest(msg) => write!(f, "[{}] Bad Request: {}", self.request_id, msg),
            ApiErrorKind::Engine(e) => write!(f, "[{}] {}", self.request_id, e),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self.kind {
            ApiErrorKind::BadRequest(msg) => msg.clone(),
            ApiErrorKind::Engine(e) => e.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(request_id = %self.request_id, %message, "Request failed");
        }

        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
