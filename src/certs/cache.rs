//! OCSP lifecycle for the leaf certificate.
//!
//! # Responsibilities
//! - Fetch and validate OCSP responses for the leaf
//! - Publish the cert-chain+cbor artifact (chain plus current OCSP)
//! - Answer the health predicate the signer consults before every exchange
//! - Run the refresh loop: half the remaining lifetime after a success,
//!   bounded backoff after a failure
//!
//! # Design Decisions
//! - Single writer (the refresh path), many readers; state is an
//!   `ArcSwapOption<OcspState>` so readers never block
//! - A failed refresh never clears state; the last good response keeps
//!   being served until its nextUpdate
//! - Health = `now + safety_margin < next_update`, evaluated on read

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use serde_cbor::Value;
use thiserror::Error;

use crate::certs::ocsp::{self, OcspError, OcspResponseInfo, OcspSource};
use crate::certs::store::CertStore;
use crate::clock::Clock;
use crate::config::OcspConfig;
use crate::lifecycle::{BackgroundTask, StopListener};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Magic first element of a cert-chain+cbor array.
pub const CERT_CHAIN_MAGIC: &str = "\u{1F4DC}\u{26D3}";

/// Errors from a single refresh attempt. None of them are fatal.
#[derive(Debug, Error)]
pub enum CertCacheError {
    #[error(transparent)]
    Ocsp(#[from] OcspError),

    #[error("OCSP response already expired at {0:?}")]
    Expired(SystemTime),

    #[error("OCSP response is older than the one currently served")]
    Stale,

    #[error("failed to encode cert-chain+cbor: {0}")]
    Encoding(String),

    #[error("OCSP disk cache I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether the signer may produce exchanges right now.
pub trait CertificateHealth: Send + Sync {
    fn is_healthy(&self) -> bool;
}

/// One accepted OCSP response and everything derived from it.
#[derive(Debug)]
struct OcspState {
    der: Bytes,
    info: OcspResponseInfo,
    fetched_at: SystemTime,
    cert_chain_cbor: Bytes,
}

/// What the publication endpoint serves.
#[derive(Debug, Clone)]
pub struct CertArtifact {
    /// Encoded `application/cert-chain+cbor`.
    pub cert_chain: Bytes,
    /// Raw DER OCSP response embedded in `cert_chain`.
    pub ocsp: Bytes,
    pub fetched_at: SystemTime,
    pub next_update: SystemTime,
}

pub struct CertificateCache {
    store: Arc<CertStore>,
    source: Arc<dyn OcspSource>,
    config: OcspConfig,
    clock: Arc<dyn Clock>,
    disk_cache: Option<PathBuf>,
    state: ArcSwapOption<OcspState>,
    task: Mutex<Option<BackgroundTask>>,
}

impl CertificateCache {
    pub fn new(
        store: Arc<CertStore>,
        source: Arc<dyn OcspSource>,
        config: OcspConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            config,
            clock,
            disk_cache: None,
            state: ArcSwapOption::empty(),
            task: Mutex::new(None),
        }
    }

    /// Persist accepted responses to `path` and seed from it at init.
    pub fn with_disk_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_cache = Some(path.into());
        self
    }

    pub fn store(&self) -> &Arc<CertStore> {
        &self.store
    }

    /// Content-derived name the chain is published under.
    pub fn cert_name(&self) -> &str {
        self.store.cert_name()
    }

    /// First load. Adopts a still-healthy disk-cached response, otherwise
    /// fetches. A failed fetch leaves the cache unhealthy and is not an error.
    pub async fn init(&self) {
        if let Some(path) = self.disk_cache.clone() {
            match self.load_disk_cache(&path).await {
                Ok(()) if self.is_healthy() => {
                    tracing::info!(path = %path.display(), "Adopted cached OCSP response");
                    return;
                }
                Ok(()) => {
                    tracing::info!(path = %path.display(), "Cached OCSP response is near expiry; refetching")
                }
                Err(CertCacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Ignoring OCSP disk cache")
                }
            }
        }

        if let Err(e) = self.refresh_once().await {
            tracing::error!(
                cert_name = %self.cert_name(),
                error = %e,
                "Initial OCSP fetch failed; signing disabled until a refresh succeeds"
            );
        }
    }

    /// Fetch, validate and install one OCSP response.
    ///
    /// Returns the new response's nextUpdate.
    pub async fn refresh_once(&self) -> Result<SystemTime, CertCacheError> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let result = match tokio::time::timeout(timeout, self.source.fetch()).await {
            Ok(fetched) => fetched
                .map_err(CertCacheError::from)
                .and_then(|der| self.accept(der)),
            Err(_) => Err(OcspError::Timeout(timeout).into()),
        };

        metrics::record_ocsp_refresh(result.is_ok());
        metrics::record_certificate_health(self.is_healthy());

        let state = result?;
        let next_update = state.info.next_update;
        tracing::info!(
            cert_name = %self.cert_name(),
            this_update = ?state.info.this_update,
            next_update = ?next_update,
            "OCSP response refreshed"
        );
        if let Some(path) = &self.disk_cache {
            if let Err(e) = persist(path, &state.der).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to persist OCSP response");
            }
        }
        Ok(next_update)
    }

    /// Validate `der` against the current state and swap it in.
    fn accept(&self, der: Bytes) -> Result<Arc<OcspState>, CertCacheError> {
        let info = ocsp::parse_usable_response(&der, &self.store.leaf().serial)?;
        let now = self.clock.now();
        if info.next_update <= now {
            return Err(CertCacheError::Expired(info.next_update));
        }
        if let Some(current) = self.state.load().as_ref() {
            if info.this_update < current.info.this_update {
                return Err(CertCacheError::Stale);
            }
        }

        let cert_chain_cbor = cert_chain_cbor(self.store.chain(), &der)?;
        let state = Arc::new(OcspState {
            der,
            info,
            fetched_at: now,
            cert_chain_cbor: Bytes::from(cert_chain_cbor),
        });
        self.state.store(Some(Arc::clone(&state)));
        Ok(state)
    }

    async fn load_disk_cache(&self, path: &Path) -> Result<(), CertCacheError> {
        let der = tokio::fs::read(path).await?;
        self.accept(Bytes::from(der)).map(|_| ())
    }

    /// The chain and OCSP proof for publication, until the response expires.
    pub fn current_artifact(&self) -> Option<CertArtifact> {
        let guard = self.state.load();
        let state = guard.as_ref()?;
        if self.clock.now() >= state.info.next_update {
            return None;
        }
        Some(CertArtifact {
            cert_chain: state.cert_chain_cbor.clone(),
            ocsp: state.der.clone(),
            fetched_at: state.fetched_at,
            next_update: state.info.next_update,
        })
    }

    /// nextUpdate of the response currently held, expired or not.
    pub fn next_update(&self) -> Option<SystemTime> {
        self.state.load().as_ref().map(|s| s.info.next_update)
    }

    /// Delay before the next scheduled refresh after a success: half the
    /// remaining lifetime, never below `min_refresh_secs`.
    pub fn next_refresh_delay(&self) -> Duration {
        let min = Duration::from_secs(self.config.min_refresh_secs);
        match self.next_update() {
            Some(next_update) => {
                let remaining = next_update
                    .duration_since(self.clock.now())
                    .unwrap_or_default();
                (remaining / 2).max(min)
            }
            None => Duration::from_secs(self.config.retry_base_secs).max(min),
        }
    }

    fn retry_delay(&self, failures: u32) -> Duration {
        calculate_backoff(
            failures,
            Duration::from_secs(self.config.retry_base_secs),
            Duration::from_secs(self.config.retry_max_secs),
        )
    }

    /// Spawn the refresh loop. A second call while running is a no-op.
    pub fn start_refresh_loop(self: &Arc<Self>) {
        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let cache = Arc::clone(self);
        *slot = Some(BackgroundTask::spawn("ocsp-refresh", move |stop| {
            cache.refresh_loop(stop)
        }));
    }

    /// Stop the refresh loop and wait for it. The held state stays readable.
    pub async fn stop_refresh_loop(&self) {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.stop().await;
        }
    }

    async fn refresh_loop(self: Arc<Self>, mut stop: StopListener) {
        let mut failures = 0u32;
        let mut delay = if self.next_update().is_some() {
            self.next_refresh_delay()
        } else {
            self.retry_delay(1)
        };

        loop {
            tracing::debug!(delay = ?delay, "Next OCSP refresh scheduled");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.stopped() => break,
            }

            let result = tokio::select! {
                result = self.refresh_once() => result,
                _ = stop.stopped() => break,
            };

            delay = match result {
                Ok(_) => {
                    failures = 0;
                    self.next_refresh_delay()
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let retry = self.retry_delay(failures);
                    tracing::warn!(
                        cert_name = %self.cert_name(),
                        error = %e,
                        failures,
                        healthy = self.is_healthy(),
                        retry_in = ?retry,
                        "OCSP refresh failed; keeping previous response"
                    );
                    retry
                }
            };
        }
        tracing::info!("OCSP refresh loop stopped");
    }
}

impl CertificateHealth for CertificateCache {
    fn is_healthy(&self) -> bool {
        let guard = self.state.load();
        let Some(state) = guard.as_ref() else {
            return false;
        };
        let margin = Duration::from_secs(self.config.safety_margin_secs);
        self.clock.now() + margin < state.info.next_update
    }
}

impl std::fmt::Debug for CertificateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateCache")
            .field("cert_name", &self.cert_name())
            .field("next_update", &self.next_update())
            .field("disk_cache", &self.disk_cache)
            .finish_non_exhaustive()
    }
}

/// Encode `["📜⛓", {"cert": leaf, "ocsp": ocsp}, {"cert": intermediate}, ...]`.
pub fn cert_chain_cbor(chain: &[Vec<u8>], ocsp: &[u8]) -> Result<Vec<u8>, CertCacheError> {
    let mut items = Vec::with_capacity(chain.len() + 1);
    items.push(Value::Text(CERT_CHAIN_MAGIC.to_string()));
    for (index, cert) in chain.iter().enumerate() {
        let mut entry = BTreeMap::new();
        entry.insert(Value::Text("cert".to_string()), Value::Bytes(cert.clone()));
        if index == 0 {
            entry.insert(Value::Text("ocsp".to_string()), Value::Bytes(ocsp.to_vec()));
        }
        items.push(Value::Map(entry));
    }
    serde_cbor::to_vec(&Value::Array(items)).map_err(|e| CertCacheError::Encoding(e.to_string()))
}

async fn persist(path: &Path, der: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, der).await?;
    tokio::fs::rename(&tmp, path).await
}
