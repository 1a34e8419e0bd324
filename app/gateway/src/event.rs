//! Admission event log.
//!
//! One row per request that passed the guard and the rate limiter,
//! regardless of what the idempotency broker or the handler did with it.

use crate::error::GatewayError;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use store::{EventRecord, Store};

/// Appends between opportunistic sweeps.
const SWEEP_EVERY: u64 = 256;

/// Time-bounded, append-only log of admitted requests.
pub struct EventLog {
    store: Arc<Store>,
    ttl_ms: i64,
    appended: AtomicU64,
}

impl EventLog {
    /// Create a log whose rows live `ttl_ms`.
    pub fn new(store: Arc<Store>, ttl_ms: u64) -> Self {
        Self {
            store,
            ttl_ms: i64::try_from(ttl_ms).unwrap_or(i64::MAX),
            appended: AtomicU64::new(0),
        }
    }

    /// Record one admitted request, returning the row id.
    pub fn append(&self, identity: &str, path: &str, now: i64) -> Result<i64, GatewayError> {
        let id = self.store.append_event(identity, path, now, self.ttl_ms)?;
        if self.appended.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            let removed = self.sweep(now)?;
            if removed > 0 {
                tracing::debug!(removed, "swept expired events");
            }
        }
        Ok(id)
    }

    /// Delete rows with `expires_at <= now`.
    pub fn sweep(&self, now: i64) -> Result<usize, GatewayError> {
        Ok(self.store.sweep_events(now)?)
    }

    /// Rows after `after`, in id order.
    pub fn recent(&self, after: i64, limit: usize) -> Result<Vec<EventRecord>, GatewayError> {
        Ok(self.store.events(after, limit)?)
    }
}
