//! Signed exchange packager.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────────┐
//!                         │                  SXG PACKAGER                     │
//!                         │                                                   │
//!   GET /priv/doc/<url>   │  ┌────────┐   ┌───────────┐   ┌──────────────┐    │
//!   ──────────────────────┼─▶│  http  │──▶│  signer   │──▶│  allow-list  │    │
//!                         │  │ server │   │ pipeline  │   └──────────────┘    │
//!                         │  └────────┘   └─────┬─────┘                       │
//!                         │                     │  health?   ┌─────────────┐  │
//!                         │                     ├───────────▶│ certs cache │◀─┼── OCSP responder
//!                         │                     │            └─────────────┘  │
//!                         │                     │  versions  ┌─────────────┐  │
//!                         │                     ├───────────▶│ rtv cache   │◀─┼── metadata URL
//!                         │                     │            └─────────────┘  │
//!                         │                     ▼                             │
//!   application/          │               origin fetch ─────────────────────┼──▶ Origin
//!   signed-exchange ◀─────┼── b3 encode ◀── eligibility                       │
//!                         │                                                   │
//!   GET /amppkg/cert/<n>  │  cert-chain+cbor from the certs cache             │
//!                         └───────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use sxg_packager::certs::{CertStore, CertificateCache, ExtensionPolicy, HttpOcspSource};
use sxg_packager::clock::{Clock, SystemClock};
use sxg_packager::config::loader::load_config;
use sxg_packager::config::SigningMode;
use sxg_packager::http::{AppState, PackagerServer};
use sxg_packager::lifecycle::signals::shutdown_signal;
use sxg_packager::observability::{logging, metrics};
use sxg_packager::rtv::{HttpRuntimeMetadataSource, RuntimeVersionCache};
use sxg_packager::signer::{ExchangeSigner, HttpOriginFetcher, UrlAllowList};

#[derive(Debug, Parser)]
#[command(name = "sxg-packager", version, about = "Signed exchange packager")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "sxg-packager.toml")]
    config: PathBuf,

    /// Development server: sign ineligible content, accept certificates
    /// without CanSignHttpExchanges, serve cert-urls from localhost.
    #[arg(long)]
    development: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = load_config(&args.config)
        .map_err(|e| format!("loading config at {}: {}", args.config.display(), e))?;
    if args.development {
        config.signer.mode = SigningMode::Development;
    }
    let development = config.signer.mode.is_development();

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = config.signer.mode.as_str(),
        "sxg-packager starting"
    );
    if development {
        tracing::warn!("Running in DEVELOPMENT mode; exchanges are marked and must not be served publicly");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    // Certificate material: fatal if unusable.
    let cert_pem = tokio::fs::read(&config.cert.cert_path)
        .await
        .map_err(|e| format!("reading {}: {}", config.cert.cert_path, e))?;
    let key_pem = tokio::fs::read_to_string(&config.cert.key_path)
        .await
        .map_err(|e| format!("reading {}: {}", config.cert.key_path, e))?;
    let policy = if development {
        ExtensionPolicy::Skip
    } else {
        ExtensionPolicy::Require
    };
    let store = Arc::new(
        CertStore::from_pem(&cert_pem, &key_pem, policy)
            .map_err(|e| format!("loading {}: {}", config.cert.cert_path, e))?,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let ocsp_source = HttpOcspSource::new(&store, Duration::from_secs(config.ocsp.timeout_secs))?;
    let mut cert_cache = CertificateCache::new(
        store.clone(),
        Arc::new(ocsp_source),
        config.ocsp.clone(),
        clock.clone(),
    );
    if let Some(path) = &config.cert.ocsp_cache_path {
        cert_cache = cert_cache.with_disk_cache(path);
    }
    let cert_cache = Arc::new(cert_cache);
    cert_cache.init().await;
    cert_cache.start_refresh_loop();

    let rtv_cache = if config.runtime_version.enabled {
        let source = HttpRuntimeMetadataSource::new(
            config.runtime_version.metadata_url.clone(),
            Duration::from_secs(config.runtime_version.timeout_secs),
        )?;
        let cache = Arc::new(RuntimeVersionCache::new(
            Arc::new(source),
            config.runtime_version.clone(),
            clock.clone(),
        ));
        cache.init().await;
        cache.start_refresh_loop();
        Some(cache)
    } else {
        None
    };

    if development && config.signer.override_base_url.is_none() {
        let port = config
            .listener
            .bind_address
            .rsplit(':')
            .next()
            .unwrap_or("8080");
        config.signer.override_base_url = Some(format!("https://localhost:{}/", port));
    }

    let origin = HttpOriginFetcher::new(Duration::from_secs(config.signer.fetch_timeout_secs))?;
    let mut signer = ExchangeSigner::new(
        config.signer.clone(),
        UrlAllowList::new(config.url_sets.clone()),
        store.clone(),
        cert_cache.clone(),
        Arc::new(origin),
        clock.clone(),
    )?;
    if let Some(base) = &config.cert.cert_url_base {
        signer = signer.with_cert_url_base(base)?;
    }
    if let Some(cache) = &rtv_cache {
        signer = signer.with_runtime_versions(cache.clone());
    }

    tracing::info!(
        path = %format!("/amppkg/cert/{}", store.cert_name()),
        "Certificate available"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let state = AppState {
        signer: Arc::new(signer),
        certs: cert_cache.clone(),
        clock,
    };
    let server = PackagerServer::new(state, &config.timeouts);
    let served = server.run(listener, shutdown_signal()).await;

    cert_cache.stop_refresh_loop().await;
    if let Some(cache) = &rtv_cache {
        cache.stop_refresh_loop().await;
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
