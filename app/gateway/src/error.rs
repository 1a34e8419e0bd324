//! Gateway error taxonomy and its HTTP mapping.

use crate::{auth::Denied, handler::HandlerError};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use store::StoreError;

/// Every way the gateway can refuse or fail a request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Missing or mismatched bearer token.
    #[error("unauthorized")]
    Unauthorized,
    /// Source address not allowlisted.
    #[error("forbidden")]
    Forbidden,
    /// Fixed window exhausted for this identity.
    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds until the window rolls over.
        retry_after_ms: u64,
    },
    /// Same idempotency key, different request.
    #[error("idempotency key was already used for a different request")]
    IdempotencyConflict,
    /// Same key and request still running past the wait timeout.
    #[error("a request with this idempotency key is still in progress")]
    IdempotencyInProgress,
    /// Mutating request without an `Idempotency-Key` header.
    #[error("missing Idempotency-Key header")]
    MissingIdempotencyKey,
    /// `Idempotency-Key` present but unusable.
    #[error("invalid Idempotency-Key header: {0}")]
    InvalidIdempotencyKey(&'static str),
    /// The application handler failed.
    #[error("{message}")]
    Handler {
        /// Status chosen by the handler.
        status: StatusCode,
        /// Handler's reason.
        message: String,
    },
    /// The persisted store is unreachable or returned an error.
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::IdempotencyConflict | Self::IdempotencyInProgress => StatusCode::CONFLICT,
            Self::MissingIdempotencyKey | Self::InvalidIdempotencyKey(_) => StatusCode::BAD_REQUEST,
            Self::Handler { status, .. } => *status,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::IdempotencyConflict => "idempotency_conflict",
            Self::IdempotencyInProgress => "idempotency_in_progress",
            Self::MissingIdempotencyKey => "missing_idempotency_key",
            Self::InvalidIdempotencyKey(_) => "invalid_idempotency_key",
            Self::Handler { .. } => "handler_failed",
            Self::Store(_) => "store_unavailable",
        }
    }
}

impl From<Denied> for GatewayError {
    fn from(denied: Denied) -> Self {
        match denied {
            Denied::Unauthorized => Self::Unauthorized,
            Denied::Forbidden => Self::Forbidden,
        }
    }
}

impl From<HandlerError> for GatewayError {
    fn from(e: HandlerError) -> Self {
        let (status, message) = e.into_parts();
        Self::Handler { status, message }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let Self::Store(e) = &self {
            tracing::error!("store error: {e}");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        let mut response = (self.status(), body).into_response();

        if let Self::RateLimited { retry_after_ms } = self {
            let secs = retry_after_ms.div_ceil(1000).max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
