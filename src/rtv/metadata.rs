//! Runtime metadata document and its fetcher.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeVersionError {
    #[error("metadata request failed: {0}")]
    Fetch(String),

    #[error("metadata request timed out after {0:?}")]
    Timeout(Duration),

    #[error("metadata is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("metadata has an empty ampRuntimeVersion")]
    MissingVersion,
}

/// The published metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMetadata {
    pub amp_runtime_version: String,

    #[serde(default)]
    pub amp_css_url: Option<String>,

    #[serde(default)]
    pub lts_runtime_version: Option<String>,

    #[serde(default)]
    pub lts_css_url: Option<String>,

    #[serde(default)]
    pub diversions: Vec<String>,

    #[serde(default)]
    pub canary_percentage: Option<String>,
}

impl RuntimeMetadata {
    pub fn parse(bytes: &[u8]) -> Result<Self, RuntimeVersionError> {
        let metadata: Self = serde_json::from_slice(bytes)?;
        if metadata.amp_runtime_version.trim().is_empty() {
            return Err(RuntimeVersionError::MissingVersion);
        }
        Ok(metadata)
    }
}

/// Collaborator that retrieves the raw metadata document.
#[async_trait]
pub trait RuntimeMetadataSource: Send + Sync {
    async fn fetch(&self) -> Result<Bytes, RuntimeVersionError>;
}

pub struct HttpRuntimeMetadataSource {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRuntimeMetadataSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RuntimeVersionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RuntimeVersionError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl RuntimeMetadataSource for HttpRuntimeMetadataSource {
    async fn fetch(&self) -> Result<Bytes, RuntimeVersionError> {
        let response = self
            .client
            .get(&self.url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RuntimeVersionError::Timeout(self.timeout)
                } else {
                    RuntimeVersionError::Fetch(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RuntimeVersionError::Fetch(format!("HTTP {}", status)));
        }
        response
            .bytes()
            .await
            .map_err(|e| RuntimeVersionError::Fetch(e.to_string()))
    }
}

impl std::fmt::Debug for HttpRuntimeMetadataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRuntimeMetadataSource")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn marker() -> &'static Regex {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER.get_or_init(|| {
        Regex::new(r#"i-amphtml-version\s*=\s*["']?([0-9A-Za-z]+)"#)
            .unwrap_or_else(|e| panic!("invalid runtime version marker pattern: {e}"))
    })
}

/// Runtime version a document declares via `i-amphtml-version`, if any.
pub fn declared_runtime_version(document: &[u8]) -> Option<String> {
    marker()
        .captures(document)
        .and_then(|c| c.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}
