//! Property tests for the URL allow-list.

use proptest::prelude::*;

use sxg_packager::config::UrlSetConfig;
use sxg_packager::signer::{SignError, UrlAllowList};

fn allowlist() -> UrlAllowList {
    let mut amp = UrlSetConfig::for_domain("example.com");
    amp.sign.path_prefix = "/amp/".to_string();
    amp.sign.allow_query = true;
    UrlAllowList::new(vec![amp])
}

fn segment() -> impl Strategy<Value = String> {
    "[a-z0-9_-]{1,12}"
}

fn path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..6)
}

proptest! {
    #[test]
    fn accepted_urls_are_unchanged(segments in path(), query in proptest::option::of("[a-z]{1,8}=[0-9]{1,8}")) {
        let mut url = format!("https://example.com/amp/{}", segments.join("/"));
        if let Some(query) = &query {
            url.push('?');
            url.push_str(query);
        }
        let list = allowlist();
        let allowed = list.validate(&url).unwrap();
        prop_assert_eq!(allowed.url.as_str(), url.as_str());
    }

    #[test]
    fn foreign_hosts_are_forbidden(host in "[a-z]{1,10}\\.(com|net|example)", segments in path()) {
        prop_assume!(host != "example.com");
        let url = format!("https://{}/amp/{}", host, segments.join("/"));
        prop_assert!(matches!(allowlist().validate(&url), Err(SignError::Forbidden(_))));
    }

    #[test]
    fn dot_segments_are_forbidden(
        before in path(),
        after in path(),
        dots in prop::sample::select(vec!["..", ".", "%2e%2e", "%2E", ".%2e", "%2f", "%5c"]),
    ) {
        let url = format!("https://example.com/amp/{}/{}/{}", before.join("/"), dots, after.join("/"));
        prop_assert!(matches!(allowlist().validate(&url), Err(SignError::Forbidden(_))));
    }

    #[test]
    fn encoded_query_values_are_accepted(
        segments in path(),
        value in prop::sample::select(vec!["%2Fhome", "%2e%2e", "a%25b", "..", "%5C", "%00"]),
    ) {
        let url = format!("https://example.com/amp/{}?next={}", segments.join("/"), value);
        let list = allowlist();
        let allowed = list.validate(&url).unwrap();
        let expected_query = format!("next={}", value);
        prop_assert_eq!(allowed.url.query(), Some(expected_query.as_str()));
    }

    #[test]
    fn validation_is_deterministic(input in "\\PC{0,64}") {
        let list = allowlist();
        let first = list.validate(&input).map(|a| a.url.to_string()).map_err(|e| e.to_string());
        let second = list.validate(&input).map(|a| a.url.to_string()).map_err(|e| e.to_string());
        prop_assert_eq!(first, second);
    }

    #[test]
    fn paths_outside_prefix_are_forbidden(segments in path()) {
        prop_assume!(segments[0] != "amp");
        let url = format!("https://example.com/{}", segments.join("/"));
        prop_assert!(matches!(allowlist().validate(&url), Err(SignError::Forbidden(_))));
    }
}
