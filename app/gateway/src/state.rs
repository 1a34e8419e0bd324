//! Shared application state for the gateway server.

use crate::{AccessGuard, EventLog, GatewayConfig, Handler, IdempotencyBroker, RateLimiter};
use std::{sync::Arc, time::Duration};
use store::Store;

/// Shared state available to all request handlers.
pub struct AppState<H: Handler> {
    /// Resolved configuration (immutable after start).
    pub config: Arc<GatewayConfig>,
    /// Persisted store backing the broker and the event log.
    pub store: Arc<Store>,
    /// Token and allowlist checks.
    pub guard: Arc<AccessGuard>,
    /// Per-identity request counters.
    pub limiter: Arc<RateLimiter>,
    /// Idempotent execution coordinator.
    pub broker: Arc<IdempotencyBroker>,
    /// Admission log.
    pub events: Arc<EventLog>,
    /// Application callback.
    pub handler: Arc<H>,
}

impl<H: Handler> AppState<H> {
    /// Wire every admission component over one store.
    pub fn new(config: Arc<GatewayConfig>, store: Arc<Store>, handler: Arc<H>) -> Self {
        let guard = AccessGuard::new(config.token.clone(), config.allowlist.clone());
        let limiter = RateLimiter::new(config.rate_limit.window_ms, config.rate_limit.max);
        let broker = IdempotencyBroker::new(
            Arc::clone(&store),
            config.idempotency_ttl_ms,
            Duration::from_millis(config.pending_wait_ms),
        );
        let events = EventLog::new(Arc::clone(&store), config.event_ttl_ms);
        Self {
            config,
            store,
            guard: Arc::new(guard),
            limiter: Arc::new(limiter),
            broker: Arc::new(broker),
            events: Arc::new(events),
            handler,
        }
    }
}

impl<H: Handler> Clone for AppState<H> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            guard: Arc::clone(&self.guard),
            limiter: Arc::clone(&self.limiter),
            broker: Arc::clone(&self.broker),
            events: Arc::clone(&self.events),
            handler: Arc::clone(&self.handler),
        }
    }
}
