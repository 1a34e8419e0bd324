//! Tollgate gateway: admits HTTP requests through an access guard, a
//! fixed-window rate limiter and an idempotency broker before handing them
//! to an application [`Handler`], recording every admission in an event log.

pub mod allowlist;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod handler;
pub mod idempotency;
pub mod limiter;
pub mod router;
pub mod state;
pub mod utils;

pub use allowlist::{AllowlistEntry, AllowlistError};
pub use auth::{AccessGuard, ClientIdentity, Denied};
pub use cli::Cli;
pub use config::{GatewayConfig, RateLimitConfig};
pub use error::GatewayError;
pub use event::EventLog;
pub use gateway::{Lifecycle, ServeHandle, ServeInfo, Server, serve};
pub use handler::{AppRequest, AppResponse, EchoHandler, Handler, HandlerError};
pub use idempotency::{Begin, CachedResponse, Fingerprint, IdempotencyBroker, Lease};
pub use limiter::{Admission, RateLimiter};
pub use state::AppState;
