//! Server lifecycle.
//!
//! `Stopped -> Starting -> Listening -> Stopping -> Stopped`. Each
//! [`Server`] owns its own socket and store, so several can run side by
//! side in one process.

use crate::{GatewayConfig, Handler};
use anyhow::{Result, bail};
use parking_lot::Mutex;
use std::{net::SocketAddr, sync::Arc};

pub mod serve;

pub use serve::{ServeHandle, serve};

/// Where a [`Server`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Not bound.
    Stopped,
    /// Opening the store and binding the socket.
    Starting,
    /// Accepting requests.
    Listening,
    /// Draining connections and closing the store.
    Stopping,
}

/// Returned by [`Server::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeInfo {
    /// Bound socket address.
    pub addr: SocketAddr,
    /// `http://host:port` for clients.
    pub base_url: String,
}

struct Inner {
    lifecycle: Lifecycle,
    handle: Option<ServeHandle>,
    info: Option<ServeInfo>,
}

/// An HTTP gateway instance with explicit start and stop.
pub struct Server<H: Handler> {
    config: Arc<GatewayConfig>,
    handler: Arc<H>,
    inner: Mutex<Inner>,
}

impl<H: Handler> Server<H> {
    /// Create a stopped server.
    pub fn new(config: GatewayConfig, handler: H) -> Self {
        Self {
            config: Arc::new(config),
            handler: Arc::new(handler),
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Stopped,
                handle: None,
                info: None,
            }),
        }
    }

    /// Open the store, bind the socket and start serving.
    ///
    /// Fails unless the server is [`Lifecycle::Stopped`].
    pub async fn start(&self) -> Result<ServeInfo> {
        {
            let mut inner = self.inner.lock();
            if inner.lifecycle != Lifecycle::Stopped {
                bail!("server is {:?}, not stopped", inner.lifecycle);
            }
            inner.lifecycle = Lifecycle::Starting;
        }

        let handle = match serve(Arc::clone(&self.config), Arc::clone(&self.handler)).await {
            Ok(handle) => handle,
            Err(e) => {
                self.inner.lock().lifecycle = Lifecycle::Stopped;
                return Err(e);
            }
        };

        let info = ServeInfo {
            addr: handle.addr,
            base_url: format!("http://{}", handle.addr),
        };
        let mut inner = self.inner.lock();
        inner.lifecycle = Lifecycle::Listening;
        inner.handle = Some(handle);
        inner.info = Some(info.clone());
        Ok(info)
    }

    /// Stop serving, release the socket and close the store.
    ///
    /// A no-op unless the server is [`Lifecycle::Listening`], so calling it
    /// twice is safe.
    pub async fn stop(&self) -> Result<()> {
        let handle = {
            let mut inner = self.inner.lock();
            if inner.lifecycle != Lifecycle::Listening {
                return Ok(());
            }
            inner.lifecycle = Lifecycle::Stopping;
            inner.info = None;
            inner.handle.take()
        };

        let result = match handle {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        };
        self.inner.lock().lifecycle = Lifecycle::Stopped;
        tracing::info!("gateway stopped");
        result
    }

    /// Base URL while listening.
    pub fn base_url(&self) -> Option<String> {
        self.inner
            .lock()
            .info
            .as_ref()
            .map(|info| info.base_url.clone())
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> Lifecycle {
        self.inner.lock().lifecycle
    }
}
