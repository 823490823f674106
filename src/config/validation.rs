//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, validity within the 7 day cap)
//! - Check URL set patterns are well-formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: PackagerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use url::Url;

use crate::config::schema::{PackagerConfig, UrlPatternConfig};

/// Upper bound on signed exchange validity imposed by verifiers.
pub const MAX_EXCHANGE_VALIDITY_SECS: u64 = 7 * 24 * 3600;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &PackagerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    let signer = &config.signer;
    if signer.max_validity_secs == 0 || signer.max_validity_secs > MAX_EXCHANGE_VALIDITY_SECS {
        errors.push(ValidationError::new(
            "signer.max_validity_secs",
            format!("must be between 1 and {}", MAX_EXCHANGE_VALIDITY_SECS),
        ));
    }
    if signer.fetch_timeout_secs == 0 {
        errors.push(ValidationError::new("signer.fetch_timeout_secs", "must be > 0"));
    }
    if let Some(base) = &signer.override_base_url {
        check_url("signer.override_base_url", base, &mut errors);
    }
    if let Some(base) = &config.cert.cert_url_base {
        check_url("cert.cert_url_base", base, &mut errors);
    }

    if config.ocsp.timeout_secs == 0 {
        errors.push(ValidationError::new("ocsp.timeout_secs", "must be > 0"));
    }
    if config.ocsp.retry_base_secs == 0 || config.ocsp.retry_base_secs > config.ocsp.retry_max_secs {
        errors.push(ValidationError::new(
            "ocsp.retry_base_secs",
            "must be > 0 and not exceed ocsp.retry_max_secs",
        ));
    }

    if config.runtime_version.enabled {
        check_url(
            "runtime_version.metadata_url",
            &config.runtime_version.metadata_url,
            &mut errors,
        );
        if config.runtime_version.refresh_interval_secs == 0 {
            errors.push(ValidationError::new(
                "runtime_version.refresh_interval_secs",
                "must be > 0",
            ));
        }
    }

    if config.url_sets.is_empty() {
        errors.push(ValidationError::new("url_sets", "at least one URL set is required"));
    }
    for (i, set) in config.url_sets.iter().enumerate() {
        check_pattern(&format!("url_sets[{}].sign", i), &set.sign, &mut errors);
        if set.sign.same_path {
            errors.push(ValidationError::new(
                format!("url_sets[{}].sign.same_path", i),
                "only valid on fetch patterns",
            ));
        }
        if let Some(fetch) = &set.fetch {
            check_pattern(&format!("url_sets[{}].fetch", i), fetch, &mut errors);
        }
        if set.max_content_size == 0 {
            errors.push(ValidationError::new(
                format!("url_sets[{}].max_content_size", i),
                "must be > 0",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_url(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    if Url::parse(value).is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a valid URL", value)));
    }
}

fn check_pattern(field: &str, pattern: &UrlPatternConfig, errors: &mut Vec<ValidationError>) {
    if pattern.domain.trim().is_empty() {
        errors.push(ValidationError::new(format!("{}.domain", field), "must not be empty"));
    }
    if pattern.schemes.is_empty() {
        errors.push(ValidationError::new(format!("{}.schemes", field), "must not be empty"));
    }
    if !pattern.path_prefix.starts_with('/') {
        errors.push(ValidationError::new(
            format!("{}.path_prefix", field),
            "must start with '/'",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::UrlSetConfig;

    fn valid_config() -> PackagerConfig {
        let mut config = PackagerConfig::default();
        config.url_sets.push(UrlSetConfig::for_domain("example.com"));
        config
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = valid_config();
        config.signer.max_validity_secs = MAX_EXCHANGE_VALIDITY_SECS + 1;
        config.url_sets[0].sign.domain = String::new();
        config.url_sets[0].sign.path_prefix = "amp".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"signer.max_validity_secs"));
        assert!(fields.contains(&"url_sets[0].sign.domain"));
        assert!(fields.contains(&"url_sets[0].sign.path_prefix"));
    }

    #[test]
    fn test_rejects_bad_override_url() {
        let mut config = valid_config();
        config.signer.override_base_url = Some("not a url".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "signer.override_base_url");
    }

    #[test]
    fn test_same_path_only_on_fetch() {
        let mut config = valid_config();
        config.url_sets[0].sign.same_path = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "url_sets[0].sign.same_path");
    }
}
