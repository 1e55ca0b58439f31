use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use std::{fmt::Write, net::SocketAddr};

/// Address used when a request carries no usable origin.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Lowercase hex SHA-256 of a client address. Raw addresses are never kept.
#[must_use]
pub fn fingerprint(address: &str) -> String {
    let digest = Sha256::digest(address.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Resolve the address a request should be counted against.
///
/// Proxy headers (`X-Forwarded-For`, then `X-Real-IP`) are only honoured when
/// `trust_forwarded` is set; otherwise any client could pick its own bucket.
#[must_use]
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> String {
    if trust_forwarded {
        if let Some(forwarded) = forwarded_address(headers) {
            return forwarded;
        }
    }

    peer.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
}

fn forwarded_address(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some(SocketAddr::from(([192, 0, 2, 10], 51_000)))
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        assert_eq!(
            fingerprint("127.0.0.1"),
            "12ca17b49af2289436f303e0166030a21e525d266e209267433801a8fd4071a0"
        );
        assert_eq!(fingerprint("unknown").len(), 64);
        assert_ne!(fingerprint("10.0.0.1"), fingerprint("10.0.0.2"));
    }

    #[test]
    fn peer_address_without_trust() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        assert_eq!(client_address(&headers, peer(), false), "192.0.2.10");
    }

    #[test]
    fn forwarded_for_first_hop_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.3"));
        assert_eq!(client_address(&headers, peer(), true), "203.0.113.7");
    }

    #[test]
    fn real_ip_when_forwarded_for_is_missing() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" "));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.3"));
        assert_eq!(client_address(&headers, peer(), true), "198.51.100.3");
    }

    #[test]
    fn trusted_without_headers_falls_back_to_peer() {
        assert_eq!(client_address(&HeaderMap::new(), peer(), true), "192.0.2.10");
    }

    #[test]
    fn unknown_origin() {
        assert_eq!(client_address(&HeaderMap::new(), None, false), UNKNOWN_CLIENT);
        assert_eq!(client_address(&HeaderMap::new(), None, true), UNKNOWN_CLIENT);
    }
}
