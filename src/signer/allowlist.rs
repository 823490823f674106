//! URL allow-list.
//!
//! Pure function of configuration and input. URL sets are tried in
//! declaration order and the first full match wins.
//!
//! Checks on the raw candidate run before parsing: the URL parser resolves
//! dot segments (including percent-encoded ones), which would otherwise
//! hide a traversal attempt from the path rules. Those checks cover the
//! authority and path only; the query is left to `allow_query`.

use url::Url;

use crate::config::{UrlPatternConfig, UrlSetConfig};
use crate::signer::error::SignError;

/// Substrings never accepted before the query, compared case-insensitively.
const ENCODED_FORBIDDEN: &[&str] = &["%2e", "%2f", "%5c", "%25", "%00"];

/// A candidate that passed the allow-list.
#[derive(Debug, Clone)]
pub struct AllowedUrl<'a> {
    pub url: Url,
    pub set: &'a UrlSetConfig,
    /// Position of `set` in the configuration.
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct UrlAllowList {
    sets: Vec<UrlSetConfig>,
}

impl UrlAllowList {
    pub fn new(sets: Vec<UrlSetConfig>) -> Self {
        Self { sets }
    }

    pub fn sets(&self) -> &[UrlSetConfig] {
        &self.sets
    }

    /// Check a URL that will be both fetched and signed.
    pub fn validate(&self, candidate: &str) -> Result<AllowedUrl<'_>, SignError> {
        let url = prevalidate(candidate)?;
        for (index, set) in self.sets.iter().enumerate() {
            if matches(&set.sign, &url).is_ok()
                && matches(set.fetch.as_ref().unwrap_or(&set.sign), &url).is_ok()
            {
                return Ok(AllowedUrl { url, set, index });
            }
        }
        Err(self.no_match(&url))
    }

    /// Check a sign URL together with a distinct fetch URL. Both must be
    /// satisfied by the same set.
    pub fn validate_pair(
        &self,
        sign_candidate: &str,
        fetch_candidate: &str,
    ) -> Result<(AllowedUrl<'_>, Url), SignError> {
        let sign = prevalidate(sign_candidate)?;
        let fetch = prevalidate(fetch_candidate)?;
        for (index, set) in self.sets.iter().enumerate() {
            let fetch_pattern = set.fetch.as_ref().unwrap_or(&set.sign);
            if matches(&set.sign, &sign).is_err() || matches(fetch_pattern, &fetch).is_err() {
                continue;
            }
            if fetch_pattern.same_path
                && (sign.path() != fetch.path() || sign.query() != fetch.query())
            {
                continue;
            }
            return Ok((AllowedUrl { url: sign, set, index }, fetch));
        }
        Err(self.no_match(&sign))
    }

    fn no_match(&self, url: &Url) -> SignError {
        let reason = self
            .sets
            .first()
            .and_then(|set| matches(&set.sign, url).err())
            .unwrap_or("no URL set configured");
        tracing::debug!(url = %url, reason, "URL rejected by allow-list");
        SignError::Forbidden(format!("{}: {}", url, reason))
    }
}

/// Checks independent of any pattern, then parse.
fn prevalidate(candidate: &str) -> Result<Url, SignError> {
    let forbidden = |reason: &str| SignError::Forbidden(format!("{}: {}", candidate, reason));

    if candidate.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(forbidden("contains whitespace or control characters"));
    }
    if candidate.contains('\\') {
        return Err(forbidden("contains a backslash"));
    }
    // Path rules stop at the query; encoded delimiters are ordinary query data.
    let after_scheme = candidate.split_once("://").map_or(candidate, |(_, rest)| rest);
    let path = after_scheme.split(['?', '#']).next().unwrap_or_default();
    let lower = path.to_ascii_lowercase();
    if ENCODED_FORBIDDEN.iter().any(|seq| lower.contains(seq)) {
        return Err(forbidden("contains an encoded path delimiter"));
    }
    if path.split('/').skip(1).any(|segment| segment == ".." || segment == ".") {
        return Err(forbidden("contains a dot segment"));
    }

    Url::parse(candidate).map_err(|e| forbidden(&format!("unparseable ({})", e)))
}

/// Why `url` fails `pattern`, if it does.
fn matches(pattern: &UrlPatternConfig, url: &Url) -> Result<(), &'static str> {
    if !pattern
        .schemes
        .iter()
        .any(|s| s.eq_ignore_ascii_case(url.scheme()))
    {
        return Err("scheme not allowed");
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err("userinfo not allowed");
    }
    if url.fragment().is_some() {
        return Err("fragment not allowed");
    }

    let host = url.host_str().ok_or("missing host")?.to_ascii_lowercase();
    let domain = pattern.domain.to_ascii_lowercase();
    let host_ok = host == domain
        || (pattern.include_subdomains && host.ends_with(&format!(".{}", domain)));
    if !host_ok {
        return Err("domain not allowed");
    }

    if let Some(port) = url.port() {
        if !pattern.allowed_ports.contains(&port) {
            return Err("port not allowed");
        }
    }

    let path = url.path();
    if !path.starts_with(&pattern.path_prefix) {
        return Err("path outside allowed prefix");
    }
    if pattern
        .path_exclude_prefixes
        .iter()
        .any(|prefix| path.starts_with(prefix.as_str()))
    {
        return Err("path excluded");
    }
    if url.query().is_some() && !pattern.allow_query {
        return Err("query not allowed");
    }
    if url.as_str().len() > pattern.max_length {
        return Err("URL too long");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list() -> UrlAllowList {
        let mut amp = UrlSetConfig::for_domain("example.com");
        amp.name = "amp".to_string();
        amp.sign.path_prefix = "/amp/".to_string();
        amp.sign.path_exclude_prefixes = vec!["/amp/private/".to_string()];
        amp.sign.allow_query = true;

        let mut everything = UrlSetConfig::for_domain("example.com");
        everything.name = "everything".to_string();
        everything.sign.include_subdomains = true;

        UrlAllowList::new(vec![amp, everything])
    }

    fn forbidden(list: &UrlAllowList, url: &str) -> bool {
        matches!(list.validate(url), Err(SignError::Forbidden(_)))
    }

    #[test]
    fn test_first_match_wins() {
        let list = list();
        let allowed = list.validate("https://example.com/amp/page?x=1").unwrap();
        assert_eq!(allowed.set.name, "amp");
        assert_eq!(allowed.index, 0);

        let allowed = list.validate("https://example.com/other").unwrap();
        assert_eq!(allowed.set.name, "everything");

        let allowed = list.validate("https://news.example.com/amp/page").unwrap();
        assert_eq!(allowed.set.name, "everything");
    }

    #[test]
    fn test_exclusions_fall_through_to_later_sets() {
        let list = list();
        let allowed = list.validate("https://example.com/amp/private/x").unwrap();
        assert_eq!(allowed.set.name, "everything");
    }

    #[test]
    fn test_rejects_scheme_and_domain() {
        let list = list();
        assert!(forbidden(&list, "javascript:alert(1)"));
        assert!(forbidden(&list, "http://example.com/amp/page"));
        assert!(forbidden(&list, "https://evil.example/"));
        assert!(forbidden(&list, "https://example.com.evil.example/"));
        assert!(forbidden(&list, "https://notexample.com/"));
    }

    #[test]
    fn test_rejects_encoded_traversal() {
        let list = list();
        assert!(forbidden(&list, "https://example.com/amp/%2e%2e/admin"));
        assert!(forbidden(&list, "https://example.com/amp/%2E%2E/admin"));
        assert!(forbidden(&list, "https://example.com/amp/..%2fadmin"));
        assert!(forbidden(&list, "https://example.com/amp/../private/x"));
        assert!(forbidden(&list, "https://example.com/amp/%252e%252e/x"));
        assert!(forbidden(&list, "https://example.com/amp\\..\\x"));
    }

    #[test]
    fn test_encoded_query_values_are_data() {
        let list = list();
        let allowed = list.validate("https://example.com/amp/page?next=%2Fhome&q=a%25b").unwrap();
        assert_eq!(allowed.url.query(), Some("next=%2Fhome&q=a%25b"));
        assert!(list.validate("https://example.com/amp/page?up=..&here=.").is_ok());
        assert!(list.validate("https://example.com/amp/page?/../x").is_ok());

        // The same bytes in the path are still refused.
        assert!(forbidden(&list, "https://example.com/amp/%2Fhome?next=1"));
        assert!(forbidden(&list, "https://example.com/amp/../x?next=%2Fhome"));
    }

    #[test]
    fn test_rejects_ports_userinfo_fragments() {
        let list = list();
        assert!(forbidden(&list, "https://example.com:8443/amp/page"));
        assert!(forbidden(&list, "https://user:pw@example.com/amp/page"));
        assert!(forbidden(&list, "https://example.com/amp/page#frag"));
        // Explicit default port is normalized away.
        assert!(list.validate("https://example.com:443/amp/page").is_ok());
    }

    #[test]
    fn test_query_and_length_limits() {
        let list = list();
        assert!(forbidden(&list, "https://example.com/other?x=1"));
        let long = format!("https://example.com/amp/{}", "a".repeat(2000));
        assert!(list.validate(&long).unwrap_err().to_string().contains("URL"));
        assert!(forbidden(&list, &long));
    }

    #[test]
    fn test_pair_requires_same_set_and_same_path() {
        let mut set = UrlSetConfig::for_domain("example.com");
        let mut fetch = UrlPatternConfig::for_domain("origin.example.com");
        fetch.schemes = vec!["http".to_string(), "https".to_string()];
        fetch.same_path = true;
        set.fetch = Some(fetch);
        let list = UrlAllowList::new(vec![set]);

        let (allowed, fetch) = list
            .validate_pair("https://example.com/a", "http://origin.example.com/a")
            .unwrap();
        assert_eq!(allowed.url.as_str(), "https://example.com/a");
        assert_eq!(fetch.as_str(), "http://origin.example.com/a");

        assert!(list
            .validate_pair("https://example.com/a", "http://origin.example.com/b")
            .is_err());
        assert!(list
            .validate_pair("https://example.com/a", "http://other.example.com/a")
            .is_err());
    }

    #[test]
    fn test_empty_list_forbids_everything() {
        let list = UrlAllowList::new(Vec::new());
        assert!(forbidden(&list, "https://example.com/"));
    }
}
