//! Application handler interface.
//!
//! The gateway owns admission; everything behind it (model calls, channel
//! delivery, agent turns) is reached through a [`Handler`]. Response bodies
//! are JSON: replays of cached responses are served as `application/json`.

use crate::auth::ClientIdentity;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;

/// An admitted request handed to the application.
#[derive(Debug, Clone)]
pub struct AppRequest {
    /// HTTP method.
    pub method: Method,
    /// Request URI (path and query).
    pub uri: Uri,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw request body.
    pub body: Bytes,
    /// Who the request was admitted for.
    pub identity: ClientIdentity,
    /// Idempotency key, present on mutating requests.
    pub idempotency_key: Option<String>,
}

/// A successful application response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// JSON body.
    pub body: Bytes,
}

impl AppResponse {
    /// Create a response from raw JSON bytes.
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Serialize `value` as the response body.
    pub fn json(status: StatusCode, value: &impl Serialize) -> Result<Self, HandlerError> {
        let body = serde_json::to_vec(value).map_err(|e| {
            HandlerError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode response: {e}"),
            )
        })?;
        Ok(Self::new(status, body))
    }
}

/// A handler failure. The idempotency record is finalized as failed, so
/// a retry with the same key and payload runs the handler again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    status: StatusCode,
    message: String,
}

impl HandlerError {
    /// Create a handler error. A status outside 4xx/5xx becomes 500.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        let status = if status.is_client_error() || status.is_server_error() {
            status
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: message.into(),
        }
    }

    /// Status propagated to the client.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Human-readable reason.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn into_parts(self) -> (StatusCode, String) {
        (self.status, self.message)
    }
}

/// Application callback invoked for admitted requests.
///
/// Uses RPITIT, no dyn dispatch. Any `Fn(AppRequest) -> impl Future` with
/// the right output implements it.
pub trait Handler: Send + Sync + 'static {
    /// Handle one admitted request.
    fn handle(
        &self,
        request: AppRequest,
    ) -> impl Future<Output = Result<AppResponse, HandlerError>> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(AppRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AppResponse, HandlerError>> + Send,
{
    fn handle(
        &self,
        request: AppRequest,
    ) -> impl Future<Output = Result<AppResponse, HandlerError>> + Send {
        self(request)
    }
}

/// Handler that echoes request metadata back as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[derive(Serialize)]
struct Echo<'a> {
    method: &'a str,
    path: &'a str,
    identity: &'a str,
    bytes: usize,
}

impl Handler for EchoHandler {
    fn handle(
        &self,
        request: AppRequest,
    ) -> impl Future<Output = Result<AppResponse, HandlerError>> + Send {
        let identity = request.identity.key();
        let echo = Echo {
            method: request.method.as_str(),
            path: request.uri.path(),
            identity: &identity,
            bytes: request.body.len(),
        };
        std::future::ready(AppResponse::json(StatusCode::OK, &echo))
    }
}
