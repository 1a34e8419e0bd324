//! Gateway configuration loaded from TOML.

use crate::allowlist::AllowlistEntry;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration filename.
pub const CONFIG_FILE: &str = "tollgate.toml";

/// Leads a scaffolded config. The token stays commented out so an unset
/// variable cannot quietly expand to an empty token.
const TOKEN_HINT: &str = "\
# Uncomment to require `Authorization: Bearer <token>` on every request.
# token = \"${TOLLGATE_TOKEN}\"

";

/// Top-level gateway configuration.
///
/// `allowlist` has no default: a config without one is rejected rather
/// than silently opened or closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port; `0` picks an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared bearer token (supports `${ENV_VAR}` expansion). Unset or
    /// empty disables the token check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Permitted source networks. Empty denies everyone.
    pub allowlist: Vec<AllowlistEntry>,
    /// SQLite database path, or `:memory:`.
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Lifetime of idempotency records.
    #[serde(default = "default_idempotency_ttl_ms")]
    pub idempotency_ttl_ms: u64,
    /// Lifetime of event rows.
    #[serde(default = "default_event_ttl_ms")]
    pub event_ttl_ms: u64,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    #[serde(default)]
    pub trust_forwarded_headers: bool,
    /// How long a duplicate request waits on an in-flight one.
    #[serde(default = "default_pending_wait_ms")]
    pub pending_wait_ms: u64,
    /// Period of the background TTL sweep.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Maximum accepted request body.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Fixed-window rate limit. Kept last so it serializes as a trailing
    /// table.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Rate limit configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window length.
    pub window_ms: u64,
    /// Requests admitted per identity per window.
    pub max: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max: 60,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    7878
}

fn default_store_path() -> String {
    "tollgate.db".to_owned()
}

fn default_idempotency_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_event_ttl_ms() -> u64 {
    7 * 24 * 60 * 60 * 1000
}

fn default_pending_wait_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            token: None,
            allowlist: vec![
                AllowlistEntry::Literal([127, 0, 0, 1].into()),
                AllowlistEntry::Literal(std::net::Ipv6Addr::LOCALHOST.into()),
            ],
            store_path: default_store_path(),
            idempotency_ttl_ms: default_idempotency_ttl_ms(),
            event_ttl_ms: default_event_ttl_ms(),
            trust_forwarded_headers: false,
            pending_wait_ms: default_pending_wait_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            max_body_bytes: default_max_body_bytes(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Parse a TOML string into a `GatewayConfig`, expanding environment
    /// variables, then validate it.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let expanded = crate::utils::expand_env_vars(toml_str);
        let mut config: Self = toml::from_str(&expanded)?;
        if config.token.as_deref().is_some_and(str::is_empty) {
            config.token = None;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("invalid config {}", path.display()))
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.window_ms == 0 {
            bail!("rate_limit.window_ms must be greater than zero");
        }
        if self.rate_limit.max == 0 {
            bail!("rate_limit.max must be greater than zero");
        }
        if self.idempotency_ttl_ms == 0 {
            bail!("idempotency_ttl_ms must be greater than zero");
        }
        if self.event_ttl_ms == 0 {
            bail!("event_ttl_ms must be greater than zero");
        }
        if self.sweep_interval_ms == 0 {
            bail!("sweep_interval_ms must be greater than zero");
        }
        Ok(())
    }

    /// `host:port` to bind.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Write a default config file at `path`, creating parent directories.
///
/// Refuses to overwrite an existing file.
pub fn scaffold_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = toml::to_string_pretty(&GatewayConfig::default())
        .context("failed to serialize default config")?;
    let contents = format!("{TOKEN_HINT}{body}");
    std::fs::write(path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
