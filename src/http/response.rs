//! Response construction.
//!
//! # Responsibilities
//! - Content types for exchanges, cert chains and the validity document
//! - Cache lifetimes bounded by what is being served
//! - Mark every development-mode exchange visibly
//!
//! # Design Decisions
//! - Error responses come from `SignError`'s `IntoResponse`; nothing here
//!   inspects error text

use std::time::SystemTime;

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::certs::CertArtifact;
use crate::config::SigningMode;
use crate::signer::{SignedExchange, SXG_CONTENT_TYPE};

pub const CERT_CHAIN_CONTENT_TYPE: &str = "application/cert-chain+cbor";
pub const X_SXG_SIGNING_MODE: &str = "x-sxg-signing-mode";

/// Longest a published cert chain may be cached.
const MAX_CERT_CACHE_SECS: u64 = 24 * 3600;
const VALIDITY_CACHE_SECS: u64 = 7 * 24 * 3600;

/// An empty CBOR map.
const VALIDITY_BODY: &[u8] = &[0xa0];

pub fn exchange_response(exchange: SignedExchange) -> Response {
    let mut response = (StatusCode::OK, exchange.bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(SXG_CONTENT_TYPE));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-transform"));
    if exchange.mode == SigningMode::Development {
        headers.insert(X_SXG_SIGNING_MODE, HeaderValue::from_static("development"));
    }
    response
}

/// `max-age` is at most a day and never past the OCSP response's nextUpdate.
pub fn cert_chain_response(artifact: CertArtifact, now: SystemTime) -> Response {
    let remaining = artifact
        .next_update
        .duration_since(now)
        .unwrap_or_default()
        .as_secs();
    let max_age = remaining.min(MAX_CERT_CACHE_SECS);

    let mut response = (StatusCode::OK, artifact.cert_chain).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(CERT_CHAIN_CONTENT_TYPE));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", max_age)) {
        headers.insert(CACHE_CONTROL, value);
    }
    response
}

pub fn validity_response() -> Response {
    let mut response = (StatusCode::OK, VALIDITY_BODY).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/cbor"));
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", VALIDITY_CACHE_SECS)) {
        headers.insert(CACHE_CONTROL, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    fn exchange(mode: SigningMode) -> SignedExchange {
        SignedExchange {
            bytes: Bytes::from_static(b"sxg1-b3\0"),
            url: url::Url::parse("https://example.com/").unwrap(),
            date: 0,
            expires: 0,
            mode,
            waived: Vec::new(),
        }
    }

    #[test]
    fn test_exchange_headers() {
        let response = exchange_response(exchange(SigningMode::Production));
        assert_eq!(response.headers()[CONTENT_TYPE], SXG_CONTENT_TYPE);
        assert_eq!(response.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(response.headers().get(X_SXG_SIGNING_MODE).is_none());

        let response = exchange_response(exchange(SigningMode::Development));
        assert_eq!(response.headers()[X_SXG_SIGNING_MODE], "development");
    }

    #[test]
    fn test_cert_max_age_bounded_by_next_update() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let artifact = |secs: u64| CertArtifact {
            cert_chain: Bytes::from_static(b"\x83"),
            ocsp: Bytes::new(),
            fetched_at: now,
            next_update: now + Duration::from_secs(secs),
        };

        let response = cert_chain_response(artifact(600), now);
        assert_eq!(response.headers()[CACHE_CONTROL], "public, max-age=600");
        let response = cert_chain_response(artifact(7 * 24 * 3600), now);
        assert_eq!(response.headers()[CACHE_CONTROL], "public, max-age=86400");
        assert_eq!(response.headers()[CONTENT_TYPE], CERT_CHAIN_CONTENT_TYPE);
    }
}
