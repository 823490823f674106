//! Certificate material and OCSP lifecycle.
//!
//! # Data Flow
//! ```text
//! PEM files (startup)
//!     → store.rs (CertStore: chain + key, immutable)
//!     → ocsp.rs (request DER, responder fetch, response parsing)
//!     → cache.rs (CertificateCache: OCSP state swap, health, refresh loop)
//!     → Consumers:
//!         ExchangeSigner (is_healthy gate, key, cert-sha256)
//!         HTTP layer (cert-chain+cbor publication)
//! ```
//!
//! # Design Decisions
//! - CertStore is built once and shared behind `Arc`; nothing mutates it
//! - OCSP state is replaced whole via `ArcSwapOption`, never edited
//! - Health is computed from the clock on every read, not stored

pub mod cache;
pub mod der;
pub mod key;
pub mod ocsp;
pub mod store;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cache::{CertArtifact, CertCacheError, CertificateCache, CertificateHealth};
pub use key::{ExchangeKey, KeyError, P256Key};
pub use ocsp::{CertStatus, HttpOcspSource, OcspError, OcspResponseInfo, OcspSource};
pub use store::{cert_name, CertStore, CertStoreError, ExtensionPolicy, LeafInfo};
