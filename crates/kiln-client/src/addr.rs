//! Transport address parsing for engine endpoints

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tonic::transport::Uri;

use crate::error::ClientError;

/// A connectable kilnd endpoint.
///
/// Providers hand out addresses in one of two families: unix domain
/// sockets (`unix:///run/kilnd.sock`, or a bare absolute path) and TCP
/// endpoints (`http://`, `https://`, or `tcp://host:port`).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAddr {
    /// Unix domain socket path
    Unix(PathBuf),
    /// HTTP(S) endpoint
    Http(Uri),
}

impl EngineAddr {
    /// Parse a transport address string.
    pub fn parse(addr: &str) -> Result<Self, ClientError> {
        let trimmed = addr.trim();
        if trimmed.is_empty() {
            return Err(invalid(addr, "empty address"));
        }

        if let Some(path) = trimmed.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid(addr, "unix scheme without a socket path"));
            }
            return Ok(EngineAddr::Unix(PathBuf::from(path)));
        }
        if trimmed.starts_with('/') {
            return Ok(EngineAddr::Unix(PathBuf::from(trimmed)));
        }

        let uri_str = if let Some(rest) = trimmed.strip_prefix("tcp://") {
            format!("http://{rest}")
        } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            return Err(invalid(
                addr,
                "unsupported scheme (expected unix://, tcp://, http:// or https://)",
            ));
        };

        let uri = Uri::from_str(&uri_str).map_err(|e| invalid(addr, &e.to_string()))?;
        if uri.host().is_none() {
            return Err(invalid(addr, "missing host"));
        }
        Ok(EngineAddr::Http(uri))
    }

    /// Whether this address is a unix domain socket.
    pub fn is_unix(&self) -> bool {
        matches!(self, EngineAddr::Unix(_))
    }
}

fn invalid(addr: &str, reason: &str) -> ClientError {
    ClientError::InvalidAddr {
        addr: addr.to_string(),
        reason: reason.to_string(),
    }
}

impl fmt::Display for EngineAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineAddr::Unix(path) => write!(f, "unix://{}", path.display()),
            EngineAddr::Http(uri) => write!(f, "{uri}"),
        }
    }
}

impl FromStr for EngineAddr {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
