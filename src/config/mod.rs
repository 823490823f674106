//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → PackagerConfig (validated, immutable)
//!     → shared by value/Arc to all subsystems at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Signing mode is an enum chosen at construction, never a runtime global

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::PackagerConfig;
pub use schema::{
    CertConfig, ListenerConfig, ObservabilityConfig, OcspConfig, RuntimeVersionConfig,
    SignerConfig, SigningMode, TimeoutConfig, UrlPatternConfig, UrlSetConfig,
};
