//! Runtime version metadata.
//!
//! # Data Flow
//! ```text
//! metadata URL (JSON)
//!     → metadata.rs (fetch + parse RuntimeMetadata)
//!     → cache.rs (RuntimeVersionSnapshot, swapped whole on success)
//!     → ExchangeSigner (eligibility: declared runtime version must be known)
//! ```
//!
//! # Design Decisions
//! - Readers get an `Arc` of the latest snapshot; no network I/O on read
//! - Last-known-good: a failed refresh leaves the previous snapshot in force
//! - Before the first successful fetch the snapshot is empty and the
//!   runtime version check is skipped

pub mod cache;
pub mod metadata;

pub use cache::{RuntimeChannel, RuntimeVersionCache, RuntimeVersionInfo, RuntimeVersionSnapshot};
pub use metadata::{
    declared_runtime_version, HttpRuntimeMetadataSource, RuntimeMetadata, RuntimeMetadataSource,
    RuntimeVersionError,
};
