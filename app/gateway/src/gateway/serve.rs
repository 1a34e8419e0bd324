//! Bind, serve, and tear down one gateway instance.

use crate::{AppState, GatewayConfig, Handler, router::router, utils::now_ms};
use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use store::Store;
use tokio::{sync::oneshot, task::JoinHandle};

/// Handle returned by [`serve`]: the bound address plus what is needed to
/// stop the server and release the store.
pub struct ServeHandle {
    /// The address the gateway is listening on.
    pub addr: SocketAddr,
    store: Arc<Store>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<Result<(), std::io::Error>>>,
    sweeper: Option<JoinHandle<()>>,
}

impl ServeHandle {
    /// The store this server writes to.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Trigger graceful shutdown, wait for the server to stop, then close
    /// the store.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        let served = match self.join.take() {
            Some(join) => join.await.context("server task failed")?,
            None => Ok(()),
        };
        self.store.close().context("failed to close store")?;
        served.context("server error")
    }
}

/// Open the store, bind the listener, and start serving on a spawned task.
///
/// Returns once the socket is bound. Call [`ServeHandle::shutdown`] to stop.
pub async fn serve<H: Handler>(config: Arc<GatewayConfig>, handler: Arc<H>) -> Result<ServeHandle> {
    let store = Arc::new(
        Store::open(&config.store_path)
            .with_context(|| format!("failed to open store at {}", config.store_path))?,
    );
    tracing::info!("opened store at {}", config.store_path);

    let bind = config.bind_address();
    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(listener) => listener,
        Err(e) => {
            let _ = store.close();
            return Err(e).with_context(|| format!("failed to bind {bind}"));
        }
    };
    let addr = listener.local_addr()?;
    tracing::info!("gateway listening on {addr}");
    if config.token.is_none() {
        tracing::warn!("no token configured; only the allowlist guards requests");
    }

    let state = AppState::new(Arc::clone(&config), Arc::clone(&store), handler);
    let sweeper = tokio::spawn(sweep_loop(
        state.clone(),
        Duration::from_millis(config.sweep_interval_ms),
    ));

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let join = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("received shutdown signal");
            })
            .await
    });

    Ok(ServeHandle {
        addr,
        store,
        shutdown_tx: Some(shutdown_tx),
        join: Some(join),
        sweeper: Some(sweeper),
    })
}

/// Periodically drop expired idempotency records, events, rate windows and
/// idle wait handles.
async fn sweep_loop<H: Handler>(state: AppState<H>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let now = now_ms();
        match state.store.sweep(now) {
            Ok(stats) if stats.idempotency + stats.events > 0 => tracing::debug!(
                idempotency = stats.idempotency,
                events = stats.events,
                "swept expired rows"
            ),
            Ok(_) => {}
            Err(e) => tracing::error!("sweep failed: {e}"),
        }
        let windows = state.limiter.sweep(now);
        let waiters = state.broker.prune_waiters();
        if windows + waiters > 0 {
            tracing::debug!(windows, waiters, "pruned in-memory state");
        }
    }
}
