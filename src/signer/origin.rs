//! Origin content fetching.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use url::Url;

const USER_AGENT: &str = concat!("sxg-packager/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum OriginFetchError {
    #[error("origin timed out after {0:?}")]
    Timeout(Duration),

    #[error("origin request failed: {0}")]
    Network(String),

    #[error("origin body exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// What the origin answered.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Collaborator that retrieves origin content.
#[async_trait]
pub trait OriginFetcher: Send + Sync {
    /// GET `url`, reading at most `max_body` bytes of payload.
    async fn fetch(&self, url: &Url, max_body: usize) -> Result<OriginResponse, OriginFetchError>;
}

/// reqwest-backed fetcher. Redirects are not followed: a redirect would
/// sign content from a URL the allow-list never saw.
#[derive(Debug, Clone)]
pub struct HttpOriginFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpOriginFetcher {
    pub fn new(timeout: Duration) -> Result<Self, OriginFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OriginFetchError::Network(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    fn map_error(&self, e: reqwest::Error) -> OriginFetchError {
        if e.is_timeout() {
            OriginFetchError::Timeout(self.timeout)
        } else {
            OriginFetchError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl OriginFetcher for HttpOriginFetcher {
    async fn fetch(&self, url: &Url, max_body: usize) -> Result<OriginResponse, OriginFetchError> {
        let mut response = self
            .client
            .get(url.clone())
            .header("accept", "text/html")
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();

        if let Some(length) = response.content_length() {
            if length > max_body as u64 {
                return Err(OriginFetchError::TooLarge { limit: max_body });
            }
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_error(e))? {
            if body.len() + chunk.len() > max_body {
                return Err(OriginFetchError::TooLarge { limit: max_body });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(OriginResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }
}
