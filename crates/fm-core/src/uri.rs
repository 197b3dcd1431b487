//! Node addressing
//!
//! A node is identified by `scheme://host:port`. Addresses are ordered by
//! scheme, then host, then port, so every node that sees the same set of
//! addresses derives the same sequence.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SCHEME: &str = "http";
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 10101;

/// Address parse error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("empty address")]
    Empty,
    #[error("invalid scheme: {0}")]
    InvalidScheme(String),
    #[error("invalid host: {0}")]
    InvalidHost(String),
    #[error("invalid port: {0}")]
    InvalidPort(String),
}

/// Network address of a cluster node
///
/// Immutable once constructed; equality is address equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeUri {
    scheme: String,
    host: String,
    port: u16,
}

impl NodeUri {
    /// Build an address from its parts, validating scheme and host.
    pub fn new(scheme: &str, host: &str, port: u16) -> Result<Self, UriError> {
        validate_scheme(scheme)?;
        validate_host(host)?;
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            port,
        })
    }

    /// Build an `http` address from host and port.
    pub fn from_host_port(host: &str, port: u16) -> Result<Self, UriError> {
        Self::new(DEFAULT_SCHEME, host, port)
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for NodeUri {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl fmt::Display for NodeUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl Ord for NodeUri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scheme
            .cmp(&other.scheme)
            .then_with(|| self.host.cmp(&other.host))
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for NodeUri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for NodeUri {
    type Err = UriError;

    /// Accepts `scheme://host:port`, `host:port`, `host` and `:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(UriError::Empty);
        }

        let (scheme, rest) = match s.split_once("://") {
            Some((scheme, rest)) => (scheme, rest),
            None => (DEFAULT_SCHEME, s),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| UriError::InvalidPort(port.to_string()))?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };
        let host = if host.is_empty() { DEFAULT_HOST } else { host };

        Self::new(scheme, host, port)
    }
}

fn validate_scheme(scheme: &str) -> Result<(), UriError> {
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(UriError::InvalidScheme(scheme.to_string()))
    }
}

fn validate_host(host: &str) -> Result<(), UriError> {
    let valid = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(UriError::InvalidHost(host.to_string()))
    }
}
