//! Idempotency broker.
//!
//! Binds a client-supplied key to a request fingerprint and guarantees the
//! application handler runs at most once per `(key, fingerprint)` while the
//! record lives. A duplicate that arrives while the first request is still
//! running blocks until the record is finalized, bounded by a wait timeout.

use crate::{error::GatewayError, handler::AppResponse, utils::now_ms};
use axum::http::{Method, StatusCode};
use bytes::Bytes;
use compact_str::CompactString;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use store::{Claim, LeaseToken, Store};
use tokio::sync::Notify;

/// Hex SHA-256 over method, path and body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint one request. `path` should include the query string.
    pub fn compute(method: &Method, path: &str, body: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");
        hasher.update(body);
        Self(hex::encode(hasher.finalize()))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The right to run the handler for one key, held until `complete` or `fail`.
#[derive(Debug, Clone)]
pub struct Lease {
    key: String,
    token: LeaseToken,
}

impl Lease {
    /// The idempotency key this lease holds.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// A previously computed response served without running the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Cached status.
    pub status: StatusCode,
    /// Cached body.
    pub body: Bytes,
}

/// Outcome of [`IdempotencyBroker::begin`].
#[derive(Debug)]
pub enum Begin {
    /// Serve this response; the handler already ran.
    Cached(CachedResponse),
    /// Run the handler, then finalize the lease.
    Claimed(Lease),
    /// The key is bound to a different request.
    Conflict,
}

/// Coordinates idempotent execution over the persisted store.
pub struct IdempotencyBroker {
    store: Arc<Store>,
    ttl_ms: i64,
    wait: Duration,
    waiters: Mutex<HashMap<CompactString, Arc<Notify>>>,
}

impl IdempotencyBroker {
    /// Create a broker whose records live `ttl_ms` and whose duplicates wait
    /// at most `wait` for an in-flight request.
    pub fn new(store: Arc<Store>, ttl_ms: u64, wait: Duration) -> Self {
        Self {
            store,
            ttl_ms: i64::try_from(ttl_ms).unwrap_or(i64::MAX),
            wait,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    fn waiter(&self, key: &str) -> Arc<Notify> {
        self.waiters
            .lock()
            .entry(CompactString::from(key))
            .or_default()
            .clone()
    }

    fn wake(&self, key: &str) {
        if let Some(notify) = self.waiters.lock().remove(key) {
            notify.notify_waiters();
        }
    }

    /// Return a cached response, claim the key, or report a conflict.
    ///
    /// A pending record with the same fingerprint is waited on until it is
    /// finalized or expires; past the wait timeout this returns
    /// [`GatewayError::IdempotencyInProgress`].
    pub async fn begin(&self, key: &str, fingerprint: &Fingerprint) -> Result<Begin, GatewayError> {
        let deadline = Instant::now() + self.wait;
        loop {
            // Register before reading so a finalize between the read and the
            // wait still wakes us.
            let notify = self.waiter(key);
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = now_ms();
            let claim = self
                .store
                .claim_idempotency(key, fingerprint.as_str(), now, self.ttl_ms)?;
            let record = match claim {
                Claim::Claimed(token) => {
                    tracing::debug!(key, "claimed idempotency key");
                    return Ok(Begin::Claimed(Lease {
                        key: key.to_owned(),
                        token,
                    }));
                }
                Claim::Completed(record) => {
                    tracing::debug!(key, "serving cached response");
                    let status = record
                        .response_status
                        .and_then(|s| StatusCode::from_u16(s).ok())
                        .unwrap_or(StatusCode::OK);
                    return Ok(Begin::Cached(CachedResponse {
                        status,
                        body: Bytes::from(record.response_body.unwrap_or_default()),
                    }));
                }
                Claim::Conflict(_) => {
                    tracing::warn!(key, "idempotency key reused with a different payload");
                    return Ok(Begin::Conflict);
                }
                Claim::Pending(record) => record,
            };

            let until_expiry = Duration::from_millis((record.expires_at - now).max(0) as u64);
            let wake_at = deadline.min(Instant::now() + until_expiry);
            tracing::debug!(key, "waiting on in-flight request");
            if tokio::time::timeout_at(wake_at.into(), notified)
                .await
                .is_err()
                && Instant::now() >= deadline
            {
                return Err(GatewayError::IdempotencyInProgress);
            }
        }
    }

    /// Cache `response` under the lease's key.
    pub fn complete(&self, lease: &Lease, response: &AppResponse) -> Result<(), GatewayError> {
        let result = self.store.complete_idempotency(
            &lease.key,
            lease.token,
            response.status.as_u16(),
            &response.body,
        );
        self.wake(&lease.key);
        if !result? {
            tracing::warn!(key = %lease.key, "lease lost before completion");
        }
        Ok(())
    }

    /// Mark the lease's key failed so a retry can run the handler again.
    pub fn fail(&self, lease: &Lease, status: StatusCode) -> Result<(), GatewayError> {
        let result = self
            .store
            .fail_idempotency(&lease.key, lease.token, status.as_u16());
        self.wake(&lease.key);
        if !result? {
            tracing::warn!(key = %lease.key, "lease lost before failure was recorded");
        }
        Ok(())
    }

    /// Drop wait handles nobody is waiting on.
    pub fn prune_waiters(&self) -> usize {
        let mut waiters = self.waiters.lock();
        let before = waiters.len();
        waiters.retain(|_, notify| Arc::strong_count(notify) > 1);
        before - waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_binds_method_path_and_body() {
        let base = Fingerprint::compute(&Method::POST, "/jobs", b"{}");
        assert_eq!(base, Fingerprint::compute(&Method::POST, "/jobs", b"{}"));
        assert_ne!(base, Fingerprint::compute(&Method::PUT, "/jobs", b"{}"));
        assert_ne!(base, Fingerprint::compute(&Method::POST, "/jobs/1", b"{}"));
        assert_ne!(base, Fingerprint::compute(&Method::POST, "/jobs", b"{ }"));
        assert_eq!(base.as_str().len(), 64);
    }

    #[test]
    fn fingerprint_separates_path_from_body() {
        let a = Fingerprint::compute(&Method::POST, "/a", b"b");
        let b = Fingerprint::compute(&Method::POST, "/a\nb", b"");
        assert_ne!(a, b);
    }
}
