//! API key authentication module.
//!
//! Keys live in osTicket's `ost_api_key` table. A key may carry a
//! comma-separated list of caller addresses in `ipaddr`; an empty list means
//! the key is usable from anywhere.

use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::errors::AppError;
use crate::models::ApiKey;
use crate::AppState;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Address of the authenticated caller, stored as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub Option<IpAddr>);

impl ClientAddr {
    /// Text recorded in `ip_address` columns.
    pub fn to_column(self) -> String {
        self.0.map(|ip| ip.to_string()).unwrap_or_default()
    }
}

/// Middleware guarding every API route.
pub async fn api_key_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let client = client_addr(&request, state.config.trust_forwarded_for);

    let Some(provided) = provided_key(&request) else {
        tracing::warn!("Rejected request from {:?}: missing API key", client);
        return AppError::Unauthorized("Missing API key".to_string()).into_response();
    };

    let record = match state.repo.find_api_key(&provided).await {
        Ok(record) => record,
        Err(e) => return e.into_response(),
    };

    match authorize(record.as_ref(), client) {
        Ok(key) => tracing::debug!("API key {} accepted for {:?}", key.id, client),
        Err(e) => {
            tracing::warn!("Rejected request from {:?}: {}", client, e);
            return e.into_response();
        }
    }

    request.extensions_mut().insert(ClientAddr(client));
    next.run(request).await
}

/// The `X-API-Key` header, or a bearer token as a fallback.
fn provided_key(request: &Request) -> Option<String> {
    let headers = request.headers();
    let from_header = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());
    let from_bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
    };

    from_header
        .or_else(from_bearer)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// Peer address, or the first `X-Forwarded-For` hop behind a trusted proxy.
fn client_addr(request: &Request, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get(FORWARDED_FOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|hop| hop.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Decide whether a looked-up key may be used by `client`.
pub fn authorize(key: Option<&ApiKey>, client: Option<IpAddr>) -> Result<&ApiKey, AppError> {
    let key = key.ok_or_else(|| AppError::Unauthorized("Invalid API key".to_string()))?;

    if !key.active {
        return Err(AppError::Forbidden("API key is not active".to_string()));
    }
    if !address_allowed(&key.ipaddr, client) {
        return Err(AppError::Forbidden("IP address not allowed".to_string()));
    }
    Ok(key)
}

/// Check `client` against a comma-separated address list.
pub fn address_allowed(allowed: &str, client: Option<IpAddr>) -> bool {
    let mut entries = allowed.split(',').map(str::trim).filter(|e| !e.is_empty()).peekable();
    if entries.peek().is_none() {
        return true;
    }

    let Some(client) = client.map(|ip| ip.to_canonical()) else {
        return false;
    };

    entries.any(|entry| {
        entry
            .parse::<IpAddr>()
            .map(|ip| ip.to_canonical() == client)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(active: bool, ipaddr: &str) -> ApiKey {
        ApiKey {
            id: 1,
            active,
            ipaddr: ipaddr.to_string(),
        }
    }

    fn ip(s: &str) -> Option<IpAddr> {
        Some(s.parse().unwrap())
    }

    #[test]
    fn test_unknown_key_is_unauthorized() {
        let err = authorize(None, ip("10.0.0.1")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_inactive_key_is_forbidden() {
        let err = authorize(Some(&key(false, "")), ip("10.0.0.1")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_empty_list_allows_anyone() {
        assert!(authorize(Some(&key(true, "")), ip("203.0.113.9")).is_ok());
        assert!(authorize(Some(&key(true, " , ")), None).is_ok());
    }

    #[test]
    fn test_listed_address_allowed() {
        let k = key(true, "192.0.2.10, 10.0.0.1");
        assert!(authorize(Some(&k), ip("10.0.0.1")).is_ok());
        let err = authorize(Some(&k), ip("10.0.0.2")).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn test_mapped_ipv6_matches_ipv4_entry() {
        assert!(address_allowed("127.0.0.1", ip("::ffff:127.0.0.1")));
    }

    #[test]
    fn test_invalid_entries_never_match() {
        assert!(!address_allowed("localhost, 10.0.0.*", ip("10.0.0.1")));
    }

    #[test]
    fn test_restricted_key_without_peer_is_denied() {
        assert!(!address_allowed("10.0.0.1", None));
    }

    fn request(forwarded: Option<&str>, peer: &str) -> Request {
        let mut builder = axum::http::Request::builder().uri("/tickets");
        if let Some(f) = forwarded {
            builder = builder.header(FORWARDED_FOR_HEADER, f);
        }
        let mut req = builder.body(axum::body::Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        req
    }

    #[test]
    fn test_forwarded_for_only_when_trusted() {
        let req = request(Some("198.51.100.7, 10.0.0.1"), "10.0.0.1:5000");
        assert_eq!(client_addr(&req, true), ip("198.51.100.7"));
        assert_eq!(client_addr(&req, false), ip("10.0.0.1"));
    }

    #[test]
    fn test_garbage_forwarded_for_falls_back_to_peer() {
        let req = request(Some("unknown"), "10.0.0.1:5000");
        assert_eq!(client_addr(&req, true), ip("10.0.0.1"));
    }

    #[test]
    fn test_bearer_fallback() {
        let req = axum::http::Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc123")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(provided_key(&req).as_deref(), Some("abc123"));

        let req = axum::http::Request::builder()
            .header(API_KEY_HEADER, "  ")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(provided_key(&req), None);
    }

    #[test]
    fn test_client_addr_column() {
        assert_eq!(ClientAddr(ip("10.0.0.1")).to_column(), "10.0.0.1");
        assert_eq!(ClientAddr(None).to_column(), "");
    }
}
