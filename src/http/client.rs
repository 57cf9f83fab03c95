//! Client identification.

use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Identifier used when nothing identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Caller identity established by an upstream authentication layer.
///
/// Insert it as a request extension before the governance middleware runs to
/// account quota per authenticated subject instead of per address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(pub String);

impl ClientIdentity {
    /// Identity for an authenticated subject, namespaced apart from addresses.
    pub fn subject(subject: impl std::fmt::Display) -> Self {
        Self(format!("sub:{}", subject))
    }
}

/// Derive the client identifier for a request.
///
/// In order: an upstream [`ClientIdentity`]; the forwarded client address
/// when `trust_forwarded_headers` is set; the peer address; [`UNKNOWN_CLIENT`].
pub fn client_identifier(request: &Request, trust_forwarded_headers: bool) -> String {
    if let Some(identity) = request.extensions().get::<ClientIdentity>() {
        return identity.0.clone();
    }

    if trust_forwarded_headers {
        if let Some(ip) = forwarded_client(request.headers()) {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}
