//! Network allowlist entries.
//!
//! An entry is either a literal address or a CIDR block. IPv4-mapped IPv6
//! addresses (`::ffff:a.b.c.d`) are compared as their IPv4 form on both
//! sides, so a dual-stack listener still matches IPv4 entries.

use serde::{Deserialize, Serialize};
use std::{fmt, net::IpAddr, str::FromStr};

/// One permitted source network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AllowlistEntry {
    /// A single address.
    Literal(IpAddr),
    /// A network block; host bits of `network` are always zero.
    Cidr {
        /// Network address.
        network: IpAddr,
        /// Prefix length in bits.
        prefix: u8,
    },
}

/// Reasons an allowlist entry fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllowlistError {
    /// The address part is not an IP address.
    #[error("invalid address in allowlist entry '{0}'")]
    Address(String),
    /// The prefix is not a number or exceeds the address width.
    #[error("invalid prefix length in allowlist entry '{0}'")]
    Prefix(String),
}

impl AllowlistEntry {
    /// Parse `a.b.c.d`, `a.b.c.d/n`, or the IPv6 equivalents.
    pub fn parse(input: &str) -> Result<Self, AllowlistError> {
        let input = input.trim();
        let Some((addr, prefix)) = input.split_once('/') else {
            let ip = input
                .parse::<IpAddr>()
                .map_err(|_| AllowlistError::Address(input.to_owned()))?;
            return Ok(Self::Literal(ip.to_canonical()));
        };

        let ip = addr
            .parse::<IpAddr>()
            .map_err(|_| AllowlistError::Address(input.to_owned()))?;
        let prefix = prefix
            .parse::<u8>()
            .map_err(|_| AllowlistError::Prefix(input.to_owned()))?;
        let width = match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > width {
            return Err(AllowlistError::Prefix(input.to_owned()));
        }

        Ok(Self::Cidr {
            network: mask(ip, prefix),
            prefix,
        })
    }

    /// Whether `ip` is this address or falls inside this block.
    pub fn matches(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        match *self {
            Self::Literal(addr) => addr == ip,
            Self::Cidr { network, prefix } => {
                let same_family = matches!(
                    (network, ip),
                    (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_))
                );
                same_family && mask(ip, prefix) == network
            }
        }
    }
}

/// Zero the host bits of `ip` beyond `prefix`.
fn mask(ip: IpAddr, prefix: u8) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V4((bits & mask).into())
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V6((bits & mask).into())
        }
    }
}

impl FromStr for AllowlistEntry {
    type Err = AllowlistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AllowlistEntry {
    type Error = AllowlistError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AllowlistEntry> for String {
    fn from(entry: AllowlistEntry) -> Self {
        entry.to_string()
    }
}

impl fmt::Display for AllowlistEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(ip) => write!(f, "{ip}"),
            Self::Cidr { network, prefix } => write!(f, "{network}/{prefix}"),
        }
    }
}
