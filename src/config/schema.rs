//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the packager.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the packager.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct PackagerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Certificate and key material locations.
    pub cert: CertConfig,

    /// OCSP refresh and health settings.
    pub ocsp: OcspConfig,

    /// Runtime version metadata refresh settings.
    pub runtime_version: RuntimeVersionConfig,

    /// Exchange construction and eligibility settings.
    pub signer: SignerConfig,

    /// URL sets this packager is authorized to fetch and sign.
    pub url_sets: Vec<UrlSetConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Certificate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertConfig {
    /// Path to the PEM certificate chain, leaf first.
    pub cert_path: String,

    /// Path to the PEM private key (PKCS#8 or SEC1, P-256).
    pub key_path: String,

    /// Where the last good OCSP response is persisted across restarts.
    pub ocsp_cache_path: Option<String>,

    /// Base URL the certificate chain is published under. When unset, the
    /// cert-url is resolved against each signed URL's origin.
    pub cert_url_base: Option<String>,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            cert_path: "cert.pem".to_string(),
            key_path: "key.pem".to_string(),
            ocsp_cache_path: None,
            cert_url_base: None,
        }
    }
}

/// OCSP lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OcspConfig {
    /// Responder request timeout in seconds.
    pub timeout_secs: u64,

    /// Health flips false this long before the response's nextUpdate,
    /// covering downstream cache propagation delay.
    pub safety_margin_secs: u64,

    /// Lower bound between two successful refreshes.
    pub min_refresh_secs: u64,

    /// Base delay for retry backoff after a failed refresh.
    pub retry_base_secs: u64,

    /// Maximum delay for retry backoff.
    pub retry_max_secs: u64,
}

impl Default for OcspConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            safety_margin_secs: 24 * 3600,
            min_refresh_secs: 60,
            retry_base_secs: 30,
            retry_max_secs: 3600,
        }
    }
}

/// Runtime version metadata configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RuntimeVersionConfig {
    /// Run the background refresh loop.
    pub enabled: bool,

    /// Metadata document location.
    pub metadata_url: String,

    /// Refresh interval in seconds.
    pub refresh_interval_secs: u64,

    /// Fetch timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RuntimeVersionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metadata_url: "https://cdn.ampproject.org/rtv/metadata".to_string(),
            refresh_interval_secs: 600,
            timeout_secs: 10,
        }
    }
}

/// Eligibility strictness.
///
/// `Production` is the default and the only mode in which ineligible
/// content is refused. `Development` signs ineligible content anyway and
/// marks every such response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    #[default]
    Production,
    Development,
}

impl SigningMode {
    pub fn is_development(self) -> bool {
        matches!(self, SigningMode::Development)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SigningMode::Production => "production",
            SigningMode::Development => "development",
        }
    }
}

/// Exchange signer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Eligibility strictness.
    pub mode: SigningMode,

    /// Upper bound on `expires - date` of a signed exchange, in seconds.
    pub max_validity_secs: u64,

    /// How far `date` is backdated to tolerate verifier clock skew.
    pub backdate_secs: u64,

    /// Origin fetch timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Response headers carried into the exchange (case-insensitive).
    pub carried_headers: Vec<String>,

    /// Reject documents declaring a runtime version unknown to the
    /// runtime version cache.
    pub check_runtime_version: bool,

    /// Replace the cert-url base, e.g. "https://localhost:8080/" for local use.
    pub override_base_url: Option<String>,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            mode: SigningMode::Production,
            max_validity_secs: 7 * 24 * 3600,
            backdate_secs: 24 * 3600,
            fetch_timeout_secs: 60,
            carried_headers: default_carried_headers(),
            check_runtime_version: true,
            override_base_url: None,
        }
    }
}

fn default_carried_headers() -> Vec<String> {
    [
        "content-type",
        "cache-control",
        "content-language",
        "content-security-policy",
        "link",
        "x-content-type-options",
        "x-frame-options",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect()
}

/// One authorized URL set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UrlSetConfig {
    /// Identifier for logging/metrics.
    #[serde(default)]
    pub name: String,

    /// Pattern the URL carried in the exchange must match.
    pub sign: UrlPatternConfig,

    /// Pattern the fetched URL must match; defaults to `sign`.
    #[serde(default)]
    pub fetch: Option<UrlPatternConfig>,

    /// Maximum origin payload size in bytes.
    #[serde(default = "default_max_content_size")]
    pub max_content_size: usize,

    /// Origin response headers that must be present.
    #[serde(default)]
    pub required_headers: Vec<String>,
}

fn default_max_content_size() -> usize {
    4 * 1024 * 1024
}

/// URL matching rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UrlPatternConfig {
    /// Permitted schemes.
    #[serde(default = "default_schemes")]
    pub schemes: Vec<String>,

    /// Exact host to match (case-insensitive).
    pub domain: String,

    /// Also match any subdomain of `domain`.
    #[serde(default)]
    pub include_subdomains: bool,

    /// Explicit ports permitted in addition to the scheme default.
    #[serde(default)]
    pub allowed_ports: Vec<u16>,

    /// Path must start with this prefix.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Paths starting with any of these are refused.
    #[serde(default)]
    pub path_exclude_prefixes: Vec<String>,

    /// Allow a query string.
    #[serde(default)]
    pub allow_query: bool,

    /// Maximum serialized URL length.
    #[serde(default = "default_max_url_length")]
    pub max_length: usize,

    /// Fetch pattern only: fetch URL must have the same path and query as
    /// the sign URL.
    #[serde(default)]
    pub same_path: bool,
}

fn default_schemes() -> Vec<String> {
    vec!["https".to_string()]
}

fn default_path_prefix() -> String {
    "/".to_string()
}

fn default_max_url_length() -> usize {
    2000
}

impl UrlPatternConfig {
    /// A pattern for `https://<domain>/` with every other field defaulted.
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            schemes: default_schemes(),
            domain: domain.into(),
            include_subdomains: false,
            allowed_ports: Vec::new(),
            path_prefix: default_path_prefix(),
            path_exclude_prefixes: Vec::new(),
            allow_query: false,
            max_length: default_max_url_length(),
            same_path: false,
        }
    }
}

impl UrlSetConfig {
    /// A URL set signing `https://<domain>/` with default limits.
    pub fn for_domain(domain: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            sign: UrlPatternConfig::for_domain(domain),
            fetch: None,
            max_content_size: default_max_content_size(),
            required_headers: Vec::new(),
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 90 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
