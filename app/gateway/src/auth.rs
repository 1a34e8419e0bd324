//! Access guard: bearer token and source-network checks.
//!
//! The token is compared first, but a source outside the allowlist is
//! always refused as forbidden, whatever the token. A bad token is only
//! reported to permitted networks.

use crate::allowlist::AllowlistEntry;
use axum::http::{HeaderMap, header};
use compact_str::{CompactString, ToCompactString};
use std::net::{IpAddr, SocketAddr};
use subtle::ConstantTimeEq;

/// The caller a request is admitted for. Used as the rate-limit key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Resolved source address.
    pub ip: IpAddr,
    /// Whether the request carried a bearer credential.
    pub token_presented: bool,
}

impl ClientIdentity {
    /// Stable key for per-client counters and event rows.
    pub fn key(&self) -> CompactString {
        self.ip.to_canonical().to_compact_string()
    }
}

/// Why the guard refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Denied {
    /// Missing or mismatched bearer token.
    #[error("unauthorized")]
    Unauthorized,
    /// Source address matches no allowlist entry.
    #[error("forbidden")]
    Forbidden,
}

/// Pure predicate over request credentials and configuration.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    token: Option<String>,
    allowlist: Vec<AllowlistEntry>,
}

impl AccessGuard {
    /// Create a guard. An empty token disables the token check; an empty
    /// allowlist denies every address.
    pub fn new(token: Option<String>, allowlist: Vec<AllowlistEntry>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            allowlist,
        }
    }

    /// Whether a token is required.
    pub fn requires_token(&self) -> bool {
        self.token.is_some()
    }

    /// Authorize a caller presenting `bearer` from `ip`.
    pub fn authorize(&self, bearer: Option<&str>, ip: IpAddr) -> Result<ClientIdentity, Denied> {
        let token_ok = match (&self.token, bearer) {
            (None, _) => true,
            (Some(expected), Some(presented)) => {
                bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
            }
            (Some(_), None) => false,
        };

        if !self.allowlist.iter().any(|entry| entry.matches(ip)) {
            return Err(Denied::Forbidden);
        }
        if !token_ok {
            return Err(Denied::Unauthorized);
        }

        Ok(ClientIdentity {
            ip,
            token_presented: bearer.is_some(),
        })
    }
}

/// Extract the credential from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolve the client address: the TCP peer, or the first parsable
/// forwarded address when proxy headers are trusted.
pub fn client_ip(peer: SocketAddr, headers: &HeaderMap, trust_forwarded: bool) -> IpAddr {
    if trust_forwarded && let Some(ip) = forwarded_ip(headers) {
        return ip;
    }
    peer.ip()
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok())
        && let Some(ip) = xff.split(',').find_map(parse_ip)
    {
        return Some(ip);
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_ip)
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"').trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    value.trim_matches(['[', ']']).parse::<IpAddr>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("bearer abc"),
        );
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer   "),
        );
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn forwarded_headers_only_when_trusted() {
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("garbage, 10.0.0.5, 10.0.0.6"),
        );

        assert_eq!(client_ip(peer, &headers, false), peer.ip());
        assert_eq!(
            client_ip(peer, &headers, true),
            "10.0.0.5".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn real_ip_fallback_accepts_socket_form() {
        let peer: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("[2001:db8::7]:443"));
        assert_eq!(
            client_ip(peer, &headers, true),
            "2001:db8::7".parse::<IpAddr>().unwrap()
        );
    }
}
