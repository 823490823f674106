//! ExchangeSigner: request → allow-list → health gate → origin fetch →
//! eligibility → header filtering → signed exchange.
//!
//! Each request is independent; the signer holds only immutable
//! configuration and handles to the shared caches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::certs::{CertStore, CertificateHealth};
use crate::clock::Clock;
use crate::config::{SignerConfig, SigningMode, UrlSetConfig};
use crate::config::validation::MAX_EXCHANGE_VALIDITY_SECS;
use crate::observability::metrics;
use crate::rtv::{declared_runtime_version, RuntimeVersionCache};
use crate::signer::allowlist::{AllowedUrl, UrlAllowList};
use crate::signer::error::SignError;
use crate::signer::exchange::{Exchange, SignatureParams};
use crate::signer::headers;
use crate::signer::origin::{OriginFetchError, OriginFetcher, OriginResponse};

/// Route prefix under which sign requests arrive.
pub const SIGN_PATH_PREFIX: &str = "/priv/doc";
pub const CERT_PATH_PREFIX: &str = "/amppkg/cert/";
pub const VALIDITY_PATH: &str = "/amppkg/validity";
const SIGNATURE_LABEL: &str = "sig";

/// Which URL to sign and, optionally, a different one to fetch it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignRequest {
    pub sign_url: String,
    pub fetch_url: Option<String>,
}

impl SignRequest {
    /// Parse `/priv/doc/<url>[?query]` or `/priv/doc?sign=<url>[&fetch=<url>]`.
    pub fn from_path(path_and_query: &str) -> Result<Self, SignError> {
        let malformed = |reason: &str| SignError::MalformedRequest(reason.to_string());
        let rest = path_and_query
            .strip_prefix(SIGN_PATH_PREFIX)
            .ok_or_else(|| malformed("not a sign request path"))?;
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        if path.is_empty() || path == "/" {
            return Self::from_query(query);
        }

        let target = path.strip_prefix('/').ok_or_else(|| malformed("expected /priv/doc/<url>"))?;
        // One level of decoding, so both `https://…` and `https%3A%2F%2F…`
        // name the same target. The query is carried through raw.
        let target = percent_decode_str(target)
            .decode_utf8()
            .map_err(|_| malformed("target URL is not UTF-8"))?;
        let sign_url = match query {
            Some(q) if !q.is_empty() => format!("{}?{}", target, q),
            _ => target.to_string(),
        };
        Ok(Self {
            sign_url,
            fetch_url: None,
        })
    }

    /// Parse the `sign=` / `fetch=` query form.
    pub fn from_query(query: Option<&str>) -> Result<Self, SignError> {
        let mut sign = None;
        let mut fetch = None;
        for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            let slot = match key.as_ref() {
                "sign" => &mut sign,
                "fetch" => &mut fetch,
                _ => continue,
            };
            if slot.is_some() {
                return Err(SignError::MalformedRequest(format!("repeated '{}' parameter", key)));
            }
            *slot = Some(value.into_owned());
        }
        let sign_url = sign
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SignError::MalformedRequest("missing 'sign' parameter".to_string()))?;
        Ok(Self {
            sign_url,
            fetch_url: fetch.filter(|f| !f.is_empty()),
        })
    }
}

/// A produced exchange and facts the HTTP layer reports about it.
#[derive(Debug, Clone)]
pub struct SignedExchange {
    pub bytes: Bytes,
    pub url: Url,
    pub date: u64,
    pub expires: u64,
    pub mode: SigningMode,
    /// Eligibility failures signed anyway (development mode only).
    pub waived: Vec<String>,
}

pub struct ExchangeSigner {
    config: SignerConfig,
    allowlist: UrlAllowList,
    store: Arc<CertStore>,
    health: Arc<dyn CertificateHealth>,
    origin: Arc<dyn OriginFetcher>,
    runtime_versions: Option<Arc<RuntimeVersionCache>>,
    clock: Arc<dyn Clock>,
    cert_url_base: Option<Url>,
}

impl ExchangeSigner {
    pub fn new(
        config: SignerConfig,
        allowlist: UrlAllowList,
        store: Arc<CertStore>,
        health: Arc<dyn CertificateHealth>,
        origin: Arc<dyn OriginFetcher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, url::ParseError> {
        let cert_url_base = config.override_base_url.as_deref().map(parse_base).transpose()?;
        if config.mode.is_development() {
            tracing::warn!(
                "DEVELOPMENT SIGNING MODE: ineligible content will be signed. Never use in production."
            );
        }
        Ok(Self {
            config,
            allowlist,
            store,
            health,
            origin,
            runtime_versions: None,
            clock,
            cert_url_base,
        })
    }

    pub fn with_runtime_versions(mut self, cache: Arc<RuntimeVersionCache>) -> Self {
        self.runtime_versions = Some(cache);
        self
    }

    /// Publish cert-urls under `base` instead of each signed URL's origin.
    /// `override_base_url` takes precedence.
    pub fn with_cert_url_base(mut self, base: &str) -> Result<Self, url::ParseError> {
        if self.cert_url_base.is_none() {
            self.cert_url_base = Some(parse_base(base)?);
        }
        Ok(self)
    }

    pub fn mode(&self) -> SigningMode {
        self.config.mode
    }

    /// Sign the target named by an inbound `/priv/doc` path and query.
    pub async fn sign_path(&self, path_and_query: &str) -> Result<SignedExchange, SignError> {
        let start = Instant::now();
        let result = match SignRequest::from_path(path_and_query) {
            Ok(request) => self.run(&request).await,
            Err(e) => Err(e),
        };
        self.record(&result, start);
        result
    }

    pub async fn sign(&self, request: &SignRequest) -> Result<SignedExchange, SignError> {
        let start = Instant::now();
        let result = self.run(request).await;
        self.record(&result, start);
        result
    }

    fn record(&self, result: &Result<SignedExchange, SignError>, start: Instant) {
        match result {
            Ok(exchange) => {
                metrics::record_sign("signed", start);
                tracing::info!(
                    url = %exchange.url,
                    bytes = exchange.bytes.len(),
                    expires = exchange.expires,
                    mode = exchange.mode.as_str(),
                    "Signed exchange"
                );
            }
            Err(e) => {
                metrics::record_sign(e.outcome(), start);
                match e {
                    SignError::InternalSigningError(_) => tracing::error!(error = %e, "Signing failed"),
                    _ => tracing::info!(error = %e, "Sign request refused"),
                }
            }
        }
    }

    async fn run(&self, request: &SignRequest) -> Result<SignedExchange, SignError> {
        // 1. Parse.
        Url::parse(&request.sign_url)
            .map_err(|e| SignError::MalformedRequest(format!("sign URL: {}", e)))?;
        if let Some(fetch) = &request.fetch_url {
            Url::parse(fetch).map_err(|e| SignError::MalformedRequest(format!("fetch URL: {}", e)))?;
        }

        // 2. Allow-list.
        let (allowed, fetch_url) = match &request.fetch_url {
            Some(fetch) if fetch != &request.sign_url => {
                self.allowlist.validate_pair(&request.sign_url, fetch)?
            }
            _ => {
                let allowed = self.allowlist.validate(&request.sign_url)?;
                let fetch_url = allowed.url.clone();
                (allowed, fetch_url)
            }
        };
        let AllowedUrl { url: sign_url, set, .. } = allowed;

        // 3. Health gate.
        if !self.health.is_healthy() {
            return Err(SignError::SigningUnavailable);
        }

        // 4. Origin fetch.
        let response = match self.origin.fetch(&fetch_url, set.max_content_size).await {
            Ok(response) => response,
            Err(OriginFetchError::TooLarge { limit }) => {
                return Err(SignError::NotEligible(format!("payload exceeds {} bytes", limit)))
            }
            Err(e) => return Err(SignError::OriginFetchFailed(e.to_string())),
        };
        if response.status == axum::http::StatusCode::NOT_FOUND {
            return Err(SignError::OriginNotFound);
        }
        if response.status != axum::http::StatusCode::OK {
            return Err(SignError::NotEligible(format!("origin status {}", response.status)));
        }
        if response.body.len() > set.max_content_size {
            return Err(SignError::NotEligible(format!(
                "payload exceeds {} bytes",
                set.max_content_size
            )));
        }

        // 5. Eligibility.
        let violations = self.eligibility_violations(set, &response);
        if !violations.is_empty() {
            match self.config.mode {
                SigningMode::Production => return Err(SignError::NotEligible(violations.join("; "))),
                SigningMode::Development => tracing::warn!(
                    url = %sign_url,
                    violations = ?violations,
                    "DEVELOPMENT MODE: signing ineligible content"
                ),
            }
        }

        // 6. Headers.
        let carried = headers::filter_headers(&response.headers, &self.config.carried_headers);

        // 7. Construct and sign.
        let now = self.clock.unix_secs();
        let date = now.saturating_sub(self.config.backdate_secs);
        let expires = date + exchange_lifetime(&self.config).as_secs();
        let params = SignatureParams {
            label: SIGNATURE_LABEL.to_string(),
            cert_sha256: self.store.leaf().sha256,
            cert_url: self.cert_url(&sign_url)?.to_string(),
            validity_url: validity_url(&sign_url)?.to_string(),
            date,
            expires,
        };

        let exchange = Exchange::new(sign_url.as_str(), carried, &response.body);
        let bytes = exchange.sign(&params, self.store.key()).map_err(|e| {
            tracing::error!(url = %sign_url, error = %e, "Exchange signing failed");
            SignError::InternalSigningError(e.to_string())
        })?;

        // 8. Return.
        Ok(SignedExchange {
            bytes: Bytes::from(bytes),
            url: sign_url,
            date,
            expires,
            mode: self.config.mode,
            waived: violations,
        })
    }

    fn eligibility_violations(&self, set: &UrlSetConfig, response: &OriginResponse) -> Vec<String> {
        let mut violations = Vec::new();

        match headers::media_type(&response.headers) {
            Some(media) if media == "text/html" => {}
            Some(media) => violations.push(format!("content-type {} is not text/html", media)),
            None => violations.push("missing content-type".to_string()),
        }
        for required in &set.required_headers {
            if !response.headers.contains_key(required.as_str()) {
                violations.push(format!("missing required header {}", required));
            }
        }
        if headers::forbids_caching(&response.headers) {
            violations.push("cache-control forbids caching".to_string());
        }
        if headers::has_variants(&response.headers) {
            violations.push("variants are not supported".to_string());
        }

        if self.config.check_runtime_version {
            if let Some(cache) = &self.runtime_versions {
                let snapshot = cache.current_snapshot();
                if !snapshot.is_empty() {
                    if let Some(version) = declared_runtime_version(&response.body) {
                        if !snapshot.contains(&version) {
                            violations.push(format!("unknown runtime version {}", version));
                        }
                    }
                }
            }
        }
        violations
    }

    fn cert_url(&self, sign_url: &Url) -> Result<Url, SignError> {
        let path = format!("{}{}", CERT_PATH_PREFIX, self.store.cert_name());
        let joined = match &self.cert_url_base {
            Some(base) => base.join(path.trim_start_matches('/')),
            None => sign_url.join(&path),
        };
        joined.map_err(|e| SignError::InternalSigningError(format!("cert-url: {}", e)))
    }
}

impl std::fmt::Debug for ExchangeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeSigner")
            .field("mode", &self.config.mode)
            .field("url_sets", &self.allowlist.sets().len())
            .field("cert_url_base", &self.cert_url_base.as_ref().map(Url::as_str))
            .finish_non_exhaustive()
    }
}

fn validity_url(sign_url: &Url) -> Result<Url, SignError> {
    sign_url
        .join(VALIDITY_PATH)
        .map_err(|e| SignError::InternalSigningError(format!("validity-url: {}", e)))
}

/// Parse a base URL, forcing a trailing slash so relative joins append.
fn parse_base(base: &str) -> Result<Url, url::ParseError> {
    if base.ends_with('/') {
        Url::parse(base)
    } else {
        Url::parse(&format!("{}/", base))
    }
}

/// Exchange lifetime actually granted for a config.
pub fn exchange_lifetime(config: &SignerConfig) -> Duration {
    Duration::from_secs(config.max_validity_secs.min(MAX_EXCHANGE_VALIDITY_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_form_appends_query() {
        let request = SignRequest::from_path("/priv/doc/https://example.com/amp?x=1&y=2").unwrap();
        assert_eq!(request.sign_url, "https://example.com/amp?x=1&y=2");
        assert_eq!(request.fetch_url, None);
    }

    #[test]
    fn test_path_form_decodes_target() {
        let request = SignRequest::from_path("/priv/doc/https%3A%2F%2Fexample.com%2Famp?x=%2F").unwrap();
        assert_eq!(request.sign_url, "https://example.com/amp?x=%2F");

        // Only one level: a double-encoded dot stays encoded for the allow-list.
        let request = SignRequest::from_path("/priv/doc/https://example.com/%252e%252e/x").unwrap();
        assert_eq!(request.sign_url, "https://example.com/%2e%2e/x");

        assert!(matches!(
            SignRequest::from_path("/priv/doc/https://example.com/%ff"),
            Err(SignError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_query_form() {
        let request = SignRequest::from_path(
            "/priv/doc?sign=https%3A%2F%2Fexample.com%2Famp&fetch=http%3A%2F%2Forigin%2Famp",
        )
        .unwrap();
        assert_eq!(request.sign_url, "https://example.com/amp");
        assert_eq!(request.fetch_url.as_deref(), Some("http://origin/amp"));
    }

    #[test]
    fn test_malformed_paths() {
        for path in [
            "/priv/doc",
            "/priv/doc/",
            "/priv/doc?fetch=https://example.com/",
            "/priv/doc?sign=a&sign=b",
            "/elsewhere/https://example.com/",
        ] {
            assert!(
                matches!(SignRequest::from_path(path), Err(SignError::MalformedRequest(_))),
                "{} should be malformed",
                path
            );
        }
    }

    #[test]
    fn test_parse_base_adds_slash() {
        let base = parse_base("https://localhost:8080").unwrap();
        assert_eq!(
            base.join("amppkg/cert/abc").unwrap().as_str(),
            "https://localhost:8080/amppkg/cert/abc"
        );
    }

    #[test]
    fn test_lifetime_is_capped() {
        let mut config = SignerConfig::default();
        config.max_validity_secs = 30 * 24 * 3600;
        assert_eq!(exchange_lifetime(&config), Duration::from_secs(MAX_EXCHANGE_VALIDITY_SECS));
    }
}
