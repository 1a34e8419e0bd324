//! HTTP routes and the per-request admission pipeline.
//!
//! Every request except `/health` passes, in order: access guard, rate
//! limiter, event log, and (for mutating methods) the idempotency broker
//! before reaching the application handler.

use crate::{
    AppState, Begin, ClientIdentity, Fingerprint, GatewayError, Handler, Lease,
    auth::{bearer_token, client_ip},
    handler::{AppRequest, HandlerError},
    limiter::Admission,
    utils::now_ms,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use store::EventRecord;

/// Request header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");
/// Response header marking a response served from the idempotency cache.
pub const IDEMPOTENT_REPLAYED: HeaderName = HeaderName::from_static("idempotent-replayed");
/// Longest accepted idempotency key, in bytes.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

const DEFAULT_EVENTS_LIMIT: usize = 100;
const MAX_EVENTS_LIMIT: usize = 500;

/// Build the axum router: `/health`, `/_events`, and a fallback that
/// admits everything else to the application handler.
pub fn router<H: Handler>(state: AppState<H>) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/health", get(health::<H>))
        .route("/_events", get(events::<H>))
        .fallback(dispatch::<H>)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// GET /health: liveness plus store reachability, no auth.
async fn health<H: Handler>(State(state): State<AppState<H>>) -> Response {
    match state.store.ping() {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => {
            tracing::error!("health check failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "ok": false,
                    "error": "store_unavailable",
                    "message": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    after: i64,
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EventView {
    id: i64,
    identity: String,
    path: String,
    accepted_at: i64,
    expires_at: i64,
}

impl From<EventRecord> for EventView {
    fn from(record: EventRecord) -> Self {
        Self {
            id: record.id,
            identity: record.identity,
            path: record.path,
            accepted_at: record.accepted_at,
            expires_at: record.expires_at,
        }
    }
}

/// GET /_events?after=<id>&limit=<n>: read back the admission log.
async fn events<H: Handler>(
    State(state): State<AppState<H>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(e) = admit(&state, peer, &headers, uri.path()) {
        return e.into_response();
    }
    let query = match Query::<EventsQuery>::try_from_uri(&uri) {
        Ok(Query(query)) => query,
        Err(rejection) => return rejection.into_response(),
    };

    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENTS_LIMIT)
        .min(MAX_EVENTS_LIMIT);
    match state.events.recent(query.after, limit) {
        Ok(rows) => {
            let events: Vec<EventView> = rows.into_iter().map(EventView::from).collect();
            Json(json!({ "events": events })).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Fallback: run the admission pipeline, then the application handler.
async fn dispatch<H: Handler>(
    State(state): State<AppState<H>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match pipeline(&state, peer, method, uri, headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Guard, rate limit, and log one request.
fn admit<H: Handler>(
    state: &AppState<H>,
    peer: SocketAddr,
    headers: &HeaderMap,
    path: &str,
) -> Result<ClientIdentity, GatewayError> {
    let ip = client_ip(peer, headers, state.config.trust_forwarded_headers);
    let identity = state
        .guard
        .authorize(bearer_token(headers), ip)
        .inspect_err(|denied| tracing::debug!(%ip, path, "denied: {denied}"))?;

    let key = identity.key();
    let now = now_ms();
    if let Admission::Rejected { retry_after_ms } = state.limiter.admit(&key, now) {
        tracing::debug!(identity = %key, retry_after_ms, "rate limited");
        return Err(GatewayError::RateLimited { retry_after_ms });
    }

    state.events.append(&key, path, now)?;
    Ok(identity)
}

async fn pipeline<H: Handler>(
    state: &AppState<H>,
    peer: SocketAddr,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let identity = admit(state, peer, &headers, uri.path())?;

    if method.is_safe() {
        let request = AppRequest {
            method,
            uri,
            headers,
            body,
            identity,
            idempotency_key: None,
        };
        let response = state.handler.handle(request).await?;
        return Ok(json_response(response.status, response.body, false));
    }

    let key = idempotency_key(&headers)?;
    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    let fingerprint = Fingerprint::compute(&method, path, &body);
    let lease = match state.broker.begin(&key, &fingerprint).await? {
        Begin::Cached(cached) => return Ok(json_response(cached.status, cached.body, true)),
        Begin::Conflict => return Err(GatewayError::IdempotencyConflict),
        Begin::Claimed(lease) => lease,
    };

    let request = AppRequest {
        method,
        uri,
        headers,
        body,
        identity,
        idempotency_key: Some(key),
    };
    execute(state, lease, request).await
}

/// Run the handler on its own task and finalize the lease from there, so a
/// dropped connection neither cancels the handler nor leaves the record
/// pending. The request future only relays the outcome.
async fn execute<H: Handler>(
    state: &AppState<H>,
    lease: Lease,
    request: AppRequest,
) -> Result<Response, GatewayError> {
    let broker = Arc::clone(&state.broker);
    let handler = Arc::clone(&state.handler);
    let task_lease = lease.clone();
    let task = tokio::spawn(async move {
        let inner = tokio::spawn(async move { handler.handle(request).await });
        let result = match inner.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(key = task_lease.key(), "handler task failed: {e}");
                Err(HandlerError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "handler panicked",
                ))
            }
        };
        let finalized = match &result {
            Ok(response) => broker.complete(&task_lease, response),
            Err(e) => broker.fail(&task_lease, e.status()),
        };
        if let Err(e) = finalized {
            tracing::error!(key = task_lease.key(), "failed to finalize lease: {e}");
        }
        result
    });

    match task.await {
        Ok(Ok(response)) => Ok(json_response(response.status, response.body, false)),
        Ok(Err(e)) => {
            tracing::warn!(key = lease.key(), status = %e.status(), "handler failed: {e}");
            Err(e.into())
        }
        Err(e) => {
            tracing::error!(key = lease.key(), "finalize task failed: {e}");
            state
                .broker
                .fail(&lease, StatusCode::INTERNAL_SERVER_ERROR)?;
            Err(GatewayError::Handler {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "handler task failed".to_owned(),
            })
        }
    }
}

/// Read and check the `Idempotency-Key` header.
fn idempotency_key(headers: &HeaderMap) -> Result<String, GatewayError> {
    let value = headers
        .get(IDEMPOTENCY_KEY)
        .ok_or(GatewayError::MissingIdempotencyKey)?;
    let value = value
        .to_str()
        .map_err(|_| GatewayError::InvalidIdempotencyKey("must be ASCII"))?
        .trim();
    if value.is_empty() {
        return Err(GatewayError::InvalidIdempotencyKey("must not be empty"));
    }
    if value.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(GatewayError::InvalidIdempotencyKey(
            "must be at most 255 bytes",
        ));
    }
    Ok(value.to_owned())
}

fn json_response(status: StatusCode, body: Bytes, replayed: bool) -> Response {
    let mut response = (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        body,
    )
        .into_response();
    if replayed {
        response
            .headers_mut()
            .insert(IDEMPOTENT_REPLAYED, HeaderValue::from_static("true"));
    }
    response
}
