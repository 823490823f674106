//! Signed exchange packager library.

pub mod certs;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod rtv;
pub mod signer;

pub use config::PackagerConfig;
pub use http::PackagerServer;
pub use lifecycle::StopSignal;
