//! Who is making a request.
//!
//! [`ClientIdentity`] is the network origin used as the rate-limit key.
//! [`AccountId`] is the authenticated account, attached to request
//! extensions by whatever login layer sits in front of the gateway.

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use std::fmt;
use std::net::SocketAddr;

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN: &str = "unknown";

/// Normalized client address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// First hop of `X-Forwarded-For`, else the transport peer.
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .map(normalize)
            .filter(|ip| !ip.is_empty());

        let ip = forwarded
            .or_else(|| peer.map(|addr| normalize(&addr.ip().to_string())))
            .unwrap_or_else(|| UNKNOWN.to_string());

        Self(ip)
    }

    pub fn from_request<B>(request: &Request<B>) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::from_parts(request.headers(), peer)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn rate_limit_key(&self) -> String {
        format!("rate_limit:{}", self.0)
    }
}

impl From<&str> for ClientIdentity {
    fn from(raw: &str) -> Self {
        Self(normalize(raw))
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Take the first entry of a comma-separated chain and drop any port.
fn normalize(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or_default().trim();

    let host = if let Some(rest) = first.strip_prefix('[') {
        // [v6]:port
        rest.split(']').next().unwrap_or_default()
    } else if first.matches(':').count() == 1 {
        // v4:port or host:port; bare v6 has more than one colon
        first.split(':').next().unwrap_or_default()
    } else {
        first
    };

    host.strip_prefix("::ffff:")
        .filter(|v4| v4.contains('.'))
        .unwrap_or(host)
        .to_string()
}

/// Authenticated account, inserted into request extensions upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_request<B>(request: &Request<B>) -> Option<Self> {
        request.extensions().get::<AccountId>().cloned()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("192.168.1.1, 10.0.0.1"));

        let peer = Some(SocketAddr::from(([10, 0, 0, 9], 4000)));
        let identity = ClientIdentity::from_parts(&headers, peer);
        assert_eq!(identity.as_str(), "192.168.1.1");
    }

    #[test]
    fn test_forwarded_for_with_port() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static("203.0.113.7:51234"));

        let identity = ClientIdentity::from_parts(&headers, None);
        assert_eq!(identity.as_str(), "203.0.113.7");
    }

    #[test]
    fn test_peer_fallback() {
        let peer = Some(SocketAddr::from(([1, 2, 3, 4], 8080)));
        let identity = ClientIdentity::from_parts(&HeaderMap::new(), peer);
        assert_eq!(identity.as_str(), "1.2.3.4");
        assert_eq!(identity.rate_limit_key(), "rate_limit:1.2.3.4");
    }

    #[test]
    fn test_empty_forwarded_header_falls_back_to_peer() {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(" "));

        let peer = Some(SocketAddr::from(([1, 2, 3, 4], 8080)));
        assert_eq!(ClientIdentity::from_parts(&headers, peer).as_str(), "1.2.3.4");
    }

    #[test]
    fn test_unknown_without_origin() {
        let identity = ClientIdentity::from_parts(&HeaderMap::new(), None);
        assert_eq!(identity.as_str(), "unknown");
    }

    #[test]
    fn test_ipv6_forms() {
        assert_eq!(ClientIdentity::from("[::1]:443").as_str(), "::1");
        assert_eq!(ClientIdentity::from("2001:db8::1").as_str(), "2001:db8::1");
        assert_eq!(ClientIdentity::from("::ffff:1.2.3.4").as_str(), "1.2.3.4");
    }

    #[test]
    fn test_from_request_uses_connect_info() {
        let mut request = Request::new(Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([9, 9, 9, 9], 1))));

        assert_eq!(ClientIdentity::from_request(&request).as_str(), "9.9.9.9");
    }

    #[test]
    fn test_account_from_request() {
        let mut request = Request::new(Body::empty());
        assert_eq!(AccountId::from_request(&request), None);

        request.extensions_mut().insert(AccountId::new("42"));
        assert_eq!(AccountId::from_request(&request), Some(AccountId::new("42")));
    }
}
