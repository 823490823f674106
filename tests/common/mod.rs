//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use rcgen::{CertificateParams, CustomExtension, KeyPair, PKCS_ECDSA_P256_SHA256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

use sxg_packager::certs::ocsp::encode_response;
use sxg_packager::certs::{
    CertStatus, CertStore, CertificateHealth, ExtensionPolicy, OcspError, OcspSource,
};
use sxg_packager::clock::ManualClock;
use sxg_packager::config::{SignerConfig, UrlSetConfig};
use sxg_packager::rtv::{RuntimeMetadataSource, RuntimeVersionError};
use sxg_packager::signer::{
    ExchangeSigner, OriginFetchError, OriginFetcher, OriginResponse, UrlAllowList,
};

pub const DAY: u64 = 24 * 3600;
pub const START: u64 = 1_700_000_000;
pub const CAN_SIGN_HTTP_EXCHANGES: &[u64] = &[1, 3, 6, 1, 4, 1, 11129, 2, 1, 22];

pub const AMP_PAGE: &str = r#"<!doctype html><html amp i-amphtml-version="012105150310000"><head></head><body>hello</body></html>"#;

/// PEM chain and PKCS#8 key for a self-signed P-256 certificate.
pub fn generate_pem(domain: &str, can_sign: bool) -> (String, String) {
    let key_pair = KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256).unwrap();
    let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
    if can_sign {
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(CAN_SIGN_HTTP_EXCHANGES, vec![0x05, 0x00]));
    }
    let cert = params.self_signed(&key_pair).unwrap();
    (cert.pem(), key_pair.serialize_pem())
}

pub fn store() -> Arc<CertStore> {
    let (cert_pem, key_pem) = generate_pem("example.com", true);
    Arc::new(CertStore::from_pem(cert_pem.as_bytes(), &key_pem, ExtensionPolicy::Require).unwrap())
}

pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
}

/// Good OCSP response for `store`'s leaf valid from `now` for `days`.
pub fn good_ocsp(store: &CertStore, now: SystemTime, days: u64) -> Vec<u8> {
    encode_response(
        &store.leaf().serial,
        CertStatus::Good,
        now,
        Some(now + Duration::from_secs(days * DAY)),
    )
}

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

/// OCSP responder returning whatever was last set; `None` fails.
#[derive(Default)]
pub struct StubOcsp {
    response: Mutex<Option<Bytes>>,
    calls: AtomicUsize,
}

impl StubOcsp {
    pub fn set(&self, response: Option<Vec<u8>>) {
        *self.response.lock().unwrap() = response.map(Bytes::from);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcspSource for StubOcsp {
    async fn fetch(&self) -> Result<Bytes, OcspError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| OcspError::Fetch("responder down".to_string()))
    }
}

/// Health that tests flip directly.
pub struct FixedHealth(AtomicBool);

impl FixedHealth {
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(healthy)))
    }

    pub fn set(&self, healthy: bool) {
        self.0.store(healthy, Ordering::SeqCst);
    }
}

impl CertificateHealth for FixedHealth {
    fn is_healthy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Origin answering from a queue of canned responses (the last one repeats),
/// recording every URL it was asked for.
pub struct StubOrigin {
    responses: Mutex<VecDeque<Result<OriginResponse, String>>>,
    requested: Mutex<Vec<Url>>,
}

impl StubOrigin {
    pub fn new(response: OriginResponse) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from([Ok(response)])),
            requested: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: &str) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::from([Err(error.to_string())])),
            requested: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requested.lock().unwrap().len()
    }

    pub fn requested(&self) -> Vec<Url> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl OriginFetcher for StubOrigin {
    async fn fetch(&self, url: &Url, max_body: usize) -> Result<OriginResponse, OriginFetchError> {
        self.requested.lock().unwrap().push(url.clone());
        let mut queue = self.responses.lock().unwrap();
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        match next {
            Some(Ok(response)) if response.body.len() > max_body => {
                Err(OriginFetchError::TooLarge { limit: max_body })
            }
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(OriginFetchError::Network(message)),
            None => Err(OriginFetchError::Network("no response queued".to_string())),
        }
    }
}

pub fn origin_response(status: u16, headers: &[(&str, &str)], body: &str) -> OriginResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.append(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    OriginResponse {
        status: StatusCode::from_u16(status).unwrap(),
        headers: map,
        body: Bytes::from(body.to_string()),
    }
}

pub fn html_response(body: &str) -> OriginResponse {
    origin_response(
        200,
        &[
            ("content-type", "text/html; charset=utf-8"),
            ("cache-control", "public, max-age=600"),
            ("set-cookie", "session=secret"),
        ],
        body,
    )
}

/// Metadata source serving a fixed document.
pub struct StubMetadata {
    body: Mutex<Option<String>>,
    pub calls: AtomicUsize,
}

impl StubMetadata {
    pub fn new(body: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            body: Mutex::new(body.map(str::to_string)),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, body: Option<String>) {
        *self.body.lock().unwrap() = body;
    }
}

#[async_trait]
impl RuntimeMetadataSource for StubMetadata {
    async fn fetch(&self) -> Result<Bytes, RuntimeVersionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.body
            .lock()
            .unwrap()
            .clone()
            .map(Bytes::from)
            .ok_or_else(|| RuntimeVersionError::Fetch("metadata unavailable".to_string()))
    }
}

pub fn metadata_json(version: &str) -> String {
    format!(
        r#"{{"ampRuntimeVersion":"{v}","ampCssUrl":"https://cdn.ampproject.org/rtv/{v}/v0.css","diversions":[]}}"#,
        v = version
    )
}

// ---------------------------------------------------------------------------
// Signer construction
// ---------------------------------------------------------------------------

pub fn url_sets() -> Vec<UrlSetConfig> {
    let mut amp = UrlSetConfig::for_domain("example.com");
    amp.name = "amp".to_string();
    amp.sign.allow_query = true;
    vec![amp]
}

pub struct SignerHarness {
    pub store: Arc<CertStore>,
    pub health: Arc<FixedHealth>,
    pub origin: Arc<StubOrigin>,
    pub clock: Arc<ManualClock>,
    pub config: SignerConfig,
    pub url_sets: Vec<UrlSetConfig>,
}

impl SignerHarness {
    pub fn new(origin: Arc<StubOrigin>) -> Self {
        Self {
            store: store(),
            health: FixedHealth::new(true),
            origin,
            clock: Arc::new(ManualClock::at_unix(START)),
            config: SignerConfig::default(),
            url_sets: url_sets(),
        }
    }

    pub fn signer(&self) -> ExchangeSigner {
        ExchangeSigner::new(
            self.config.clone(),
            UrlAllowList::new(self.url_sets.clone()),
            self.store.clone(),
            self.health.clone(),
            self.origin.clone(),
            self.clock.clone(),
        )
        .unwrap()
    }

    pub fn verifying_key(&self) -> p256::ecdsa::VerifyingKey {
        p256::ecdsa::VerifyingKey::from_sec1_bytes(&self.store.key().public_key_sec1()).unwrap()
    }
}

// ---------------------------------------------------------------------------
// Mock origin over TCP
// ---------------------------------------------------------------------------

/// Start a mock origin on an ephemeral port answering every request with
/// `status`, `headers` and `body`. Returns the bound address.
pub async fn start_mock_origin(
    status: u16,
    headers: &'static [(&'static str, &'static str)],
    body: &'static str,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;

                        let status_text = match status {
                            200 => "200 OK",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            _ => "200 OK",
                        };
                        let mut response = format!("HTTP/1.1 {}\r\n", status_text);
                        for (name, value) in headers {
                            response.push_str(&format!("{}: {}\r\n", name, value));
                        }
                        response.push_str(&format!(
                            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        ));
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
