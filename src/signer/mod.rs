//! Exchange signing subsystem.
//!
//! # Data Flow
//! ```text
//! /priv/doc request
//!     → packager.rs (SignRequest parsing, pipeline orchestration)
//!     → allowlist.rs (URL set matching, first match wins)
//!     → [CertificateCache health gate]
//!     → origin.rs (fetch with timeout and size bound)
//!     → packager.rs (eligibility, optionally waived in development mode)
//!     → headers.rs (hop-by-hop / stateful stripping, carried allow-list)
//!     → exchange.rs (mi-sha256, signed message, b3 encoding)
//!     → HTTP layer
//! ```
//!
//! # Design Decisions
//! - Every failure is a `SignError` variant; the HTTP status is derived
//!   from the variant and never from message text
//! - The allow-list runs before any network I/O
//! - Development mode relaxes eligibility only, never the allow-list or
//!   the health gate

pub mod allowlist;
pub mod error;
pub mod exchange;
pub mod headers;
pub mod origin;
pub mod packager;

pub use allowlist::{AllowedUrl, UrlAllowList};
pub use error::SignError;
pub use exchange::{decode, DecodedExchange, SXG_CONTENT_TYPE};
pub use origin::{HttpOriginFetcher, OriginFetchError, OriginFetcher, OriginResponse};
pub use packager::{ExchangeSigner, SignRequest, SignedExchange};
