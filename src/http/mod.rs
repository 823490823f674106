//! HTTP surface of the packager.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, timeout, tracing)
//!     → request.rs (request ID assignment and propagation)
//!     → handlers:
//!         /priv/doc/...        → ExchangeSigner
//!         /amppkg/cert/<name>  → CertificateCache artifact
//!         /amppkg/validity     → empty CBOR map
//!         /healthz             → mode + certificate health
//!     → response.rs (content types, cache headers)
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeUuidRequestId, X_REQUEST_ID};
pub use server::{AppState, PackagerServer};
