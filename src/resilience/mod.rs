//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Background refresh failure (OCSP responder unreachable, bad response):
//!     → backoff.rs (next retry delay, exponential with jitter)
//!     → refresh loop sleeps, then retries
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Request-path fetches are never retried internally; callers retry
//! - Background retries are bounded by a maximum delay

pub mod backoff;
