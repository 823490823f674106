//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (request ID, tracing, timeout)
//! - Serve on a listener until the shutdown future resolves

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{OriginalUri, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::certs::{CertificateCache, CertificateHealth};
use crate::clock::Clock;
use crate::config::TimeoutConfig;
use crate::http::request::{self, MakeUuidRequestId};
use crate::http::response;
use crate::signer::ExchangeSigner;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub signer: Arc<ExchangeSigner>,
    pub certs: Arc<CertificateCache>,
    pub clock: Arc<dyn Clock>,
}

/// HTTP server for the packager.
pub struct PackagerServer {
    router: Router,
}

impl PackagerServer {
    pub fn new(state: AppState, timeouts: &TimeoutConfig) -> Self {
        Self {
            router: build_router(state, Duration::from_secs(timeouts.request_secs)),
        }
    }

    /// The fully layered router, for serving or in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/priv/doc", get(sign_handler))
        .route("/priv/doc/{*sign_url}", get(sign_handler))
        .route("/amppkg/cert/{name}", get(cert_handler))
        .route("/amppkg/validity", get(validity_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeUuidRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(request::make_span))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

/// The original path is used rather than the decoded wildcard capture so
/// the allow-list sees exactly what the caller sent.
async fn sign_handler(State(state): State<AppState>, OriginalUri(uri): OriginalUri) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());

    match state.signer.sign_path(path_and_query).await {
        Ok(exchange) => response::exchange_response(exchange),
        Err(e) => e.into_response(),
    }
}

async fn cert_handler(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    if name != state.certs.cert_name() {
        return (StatusCode::NOT_FOUND, "Unknown certificate").into_response();
    }
    match state.certs.current_artifact() {
        Some(artifact) => response::cert_chain_response(artifact, state.clock.now()),
        None => (StatusCode::SERVICE_UNAVAILABLE, "No valid OCSP response").into_response(),
    }
}

async fn validity_handler() -> Response {
    response::validity_response()
}

#[derive(Debug, Serialize)]
struct HealthReport<'a> {
    status: &'static str,
    certificate_healthy: bool,
    signing_mode: &'static str,
    cert_name: &'a str,
    ocsp_next_update: Option<u64>,
}

async fn health_handler(State(state): State<AppState>) -> Response {
    let healthy = state.certs.is_healthy();
    let report = HealthReport {
        status: if healthy { "ok" } else { "degraded" },
        certificate_healthy: healthy,
        signing_mode: state.signer.mode().as_str(),
        cert_name: state.certs.cert_name(),
        ocsp_next_update: state.certs.next_update().and_then(|t| {
            t.duration_since(std::time::UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs())
        }),
    };
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}
