//! Identity key generation and handling.

use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::{IpAddr, SocketAddr};

use crate::error::{Result, TollgateError};

/// A key that identifies whose quota a request is charged against.
///
/// Keys built from peer addresses carry only the IP, so every connection
/// from one host shares one limiter regardless of source port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Create an identity key from an arbitrary value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The shared key used when a request's identity cannot be determined.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Whether this is the shared fallback key.
    pub fn is_unknown(&self) -> bool {
        self.0.is_empty()
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for IdentityKey {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl From<SocketAddr> for IdentityKey {
    fn from(addr: SocketAddr) -> Self {
        Self::from(addr.ip())
    }
}

impl From<&str> for IdentityKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unknown() {
            write!(f, "<unknown>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Extract the caller identity from the peer address the server recorded.
///
/// Fails when the request carries no connection info, e.g. when the router
/// was served without `into_make_service_with_connect_info`.
pub fn extract_identity<B>(request: &Request<B>) -> Result<IdentityKey> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| IdentityKey::from(*addr))
        .ok_or_else(|| TollgateError::Identity("request has no peer address".to_string()))
}
