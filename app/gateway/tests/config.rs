//! Gateway configuration tests.

use tollgate_gateway::{GatewayConfig, RateLimitConfig, config::scaffold_config};

#[test]
fn parse_minimal_config() {
    let toml = r#"
allowlist = ["127.0.0.1"]
"#;
    let config = GatewayConfig::from_toml(toml).unwrap();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 7878);
    assert!(config.token.is_none());
    assert_eq!(config.allowlist.len(), 1);
    assert_eq!(config.store_path, "tollgate.db");
    assert_eq!(config.idempotency_ttl_ms, 86_400_000);
    assert_eq!(config.event_ttl_ms, 604_800_000);
    assert_eq!(config.rate_limit, RateLimitConfig::default());
    assert!(!config.trust_forwarded_headers);
    assert_eq!(config.pending_wait_ms, 30_000);
    assert_eq!(config.max_body_bytes, 1024 * 1024);
}

#[test]
fn parse_full_config() {
    let toml = r#"
host = "0.0.0.0"
port = 9000
token = "s3cret"
allowlist = ["10.0.0.0/8", "::1", "192.168.1.7"]
store_path = ":memory:"
idempotency_ttl_ms = 1000
event_ttl_ms = 2000
trust_forwarded_headers = true
pending_wait_ms = 50
sweep_interval_ms = 100
max_body_bytes = 4096

[rate_limit]
window_ms = 1000
max = 2
"#;
    let config = GatewayConfig::from_toml(toml).unwrap();
    assert_eq!(config.bind_address(), "0.0.0.0:9000");
    assert_eq!(config.token.as_deref(), Some("s3cret"));
    assert_eq!(config.allowlist.len(), 3);
    assert_eq!(config.allowlist[0].to_string(), "10.0.0.0/8");
    assert_eq!(config.store_path, ":memory:");
    assert_eq!(config.rate_limit.window_ms, 1000);
    assert_eq!(config.rate_limit.max, 2);
    assert!(config.trust_forwarded_headers);
    assert_eq!(config.max_body_bytes, 4096);
}

#[test]
fn partial_rate_limit_keeps_defaults() {
    let toml = r#"
allowlist = []

[rate_limit]
max = 5
"#;
    let config = GatewayConfig::from_toml(toml).unwrap();
    assert_eq!(config.rate_limit.window_ms, 60_000);
    assert_eq!(config.rate_limit.max, 5);
}

#[test]
fn missing_allowlist_is_rejected() {
    assert!(GatewayConfig::from_toml("port = 1").is_err());
}

#[test]
fn bad_allowlist_entries_are_rejected() {
    for entry in ["not-an-ip", "10.0.0.0/33", "::/129", "10.0.0.0/x"] {
        let toml = format!("allowlist = [\"{entry}\"]");
        assert!(
            GatewayConfig::from_toml(&toml).is_err(),
            "{entry} should be rejected"
        );
    }
}

#[test]
fn empty_token_disables_token_check() {
    let toml = "token = \"\"\nallowlist = []";
    let config = GatewayConfig::from_toml(toml).unwrap();
    assert!(config.token.is_none());
}

#[test]
fn token_expands_env_vars() {
    // SAFETY: no other test reads or writes this variable.
    unsafe {
        std::env::set_var("TOLLGATE_CONFIG_TEST_TOKEN", "from-env");
    }
    let toml = "token = \"${TOLLGATE_CONFIG_TEST_TOKEN}\"\nallowlist = []";
    let config = GatewayConfig::from_toml(toml).unwrap();
    assert_eq!(config.token.as_deref(), Some("from-env"));
}

#[test]
fn zero_values_are_rejected() {
    for extra in [
        "[rate_limit]\nwindow_ms = 0",
        "[rate_limit]\nmax = 0",
        "idempotency_ttl_ms = 0",
        "event_ttl_ms = 0",
        "sweep_interval_ms = 0",
    ] {
        let toml = if extra.starts_with('[') {
            format!("allowlist = []\n{extra}")
        } else {
            format!("{extra}\nallowlist = []")
        };
        assert!(GatewayConfig::from_toml(&toml).is_err(), "{extra}");
    }
}

#[test]
fn ipv6_host_is_bracketed() {
    let toml = "host = \"::1\"\nport = 80\nallowlist = []";
    let config = GatewayConfig::from_toml(toml).unwrap();
    assert_eq!(config.bind_address(), "[::1]:80");
}

#[test]
fn scaffold_writes_loadable_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("tollgate.toml");
    scaffold_config(&path).unwrap();

    let config = GatewayConfig::load(&path).unwrap();
    assert_eq!(config.port, 7878);
    assert_eq!(config.allowlist.len(), 2);
    assert!(config.token.is_none());

    // The token line is a commented hint, never an active setting.
    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("# token = \"${TOLLGATE_TOKEN}\""));
    assert!(!written.lines().any(|l| l.starts_with("token")));

    assert!(scaffold_config(&path).is_err(), "must not overwrite");
}
