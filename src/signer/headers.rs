//! Response header rules for exchange construction.
//!
//! Hop-by-hop headers (and any named by `Connection`) describe one HTTP
//! connection, not the resource. Stateful headers would let one user's
//! state be replayed to every viewer of the exchange. Neither may be
//! signed.

use std::collections::{BTreeMap, HashSet};

use axum::http::header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE};
use axum::http::HeaderMap;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const STATEFUL: &[&str] = &[
    "authentication-control",
    "authentication-info",
    "clear-site-data",
    "optional-www-authenticate",
    "proxy-authenticate",
    "proxy-authentication-info",
    "public-key-pins",
    "sec-websocket-accept",
    "set-cookie",
    "set-cookie2",
    "setprofile",
    "strict-transport-security",
    "www-authenticate",
];

/// Headers the exchange encoder writes itself.
const RESERVED: &[&str] = &["content-encoding", "content-length", "digest"];

/// Lowercased headers to carry into the exchange: present in `carried`,
/// not hop-by-hop, not stateful. Repeated values are joined with ", ".
pub fn filter_headers(headers: &HeaderMap, carried: &[String]) -> BTreeMap<String, String> {
    let carried: HashSet<String> = carried.iter().map(|h| h.to_ascii_lowercase()).collect();
    let connection_named: HashSet<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if HOP_BY_HOP.contains(&name)
            || STATEFUL.contains(&name)
            || RESERVED.contains(&name)
            || connection_named.contains(name)
            || !carried.contains(name)
        {
            continue;
        }
        let Ok(value) = value.to_str() else {
            tracing::debug!(header = name, "Dropping non-ASCII header value");
            continue;
        };
        out.entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    out
}

/// Media type without parameters, lowercased.
pub fn media_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
}

/// `Cache-Control: no-store` or `private` forbids re-serving by a cache.
pub fn forbids_caching(headers: &HeaderMap) -> bool {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|d| d.trim().split('=').next().unwrap_or("").to_ascii_lowercase())
        .any(|d| d == "no-store" || d == "private")
}

/// Content negotiation headers that a single exchange cannot represent.
pub fn has_variants(headers: &HeaderMap) -> bool {
    headers.contains_key("variants") || headers.contains_key("variant-key")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn carried() -> Vec<String> {
        vec![
            "Content-Type".to_string(),
            "cache-control".to_string(),
            "link".to_string(),
            "x-custom".to_string(),
            "set-cookie".to_string(),
        ]
    }

    #[test]
    fn test_filter_keeps_only_carried_and_safe_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("text/html"));
        headers.insert("set-cookie", HeaderValue::from_static("session=abc"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("server", HeaderValue::from_static("nginx"));
        headers.append("link", HeaderValue::from_static("<a.css>; rel=preload"));
        headers.append("link", HeaderValue::from_static("<b.js>; rel=preload"));

        let out = filter_headers(&headers, &carried());
        assert_eq!(out.get("content-type").map(String::as_str), Some("text/html"));
        assert_eq!(
            out.get("link").map(String::as_str),
            Some("<a.css>; rel=preload, <b.js>; rel=preload")
        );
        assert!(!out.contains_key("set-cookie"));
        assert!(!out.contains_key("transfer-encoding"));
        assert!(!out.contains_key("server"));
    }

    #[test]
    fn test_connection_named_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("close, X-Custom"));
        headers.insert("x-custom", HeaderValue::from_static("1"));
        assert!(filter_headers(&headers, &carried()).is_empty());
    }

    #[test]
    fn test_media_type_and_cache_control() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("Text/HTML; charset=utf-8"));
        assert_eq!(media_type(&headers).as_deref(), Some("text/html"));

        headers.insert("cache-control", HeaderValue::from_static("public, max-age=60"));
        assert!(!forbids_caching(&headers));
        headers.insert("cache-control", HeaderValue::from_static("max-age=0, Private"));
        assert!(forbids_caching(&headers));

        assert!(!has_variants(&headers));
        headers.insert("variant-key", HeaderValue::from_static("en"));
        assert!(has_variants(&headers));
    }
}
