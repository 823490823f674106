//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Load certs → Init caches → Start refresh loops → Serve
//!
//! Background tasks (task.rs):
//!     spawn(loop) → BackgroundTask { StopSignal, handle }, loop holds StopListener
//!     stop() → trigger StopSignal → await handle
//!
//! Shutdown (stop.rs, signals.rs):
//!     SIGTERM/SIGINT → stop accepting → stop refresh loops → exit
//! ```
//!
//! # Design Decisions
//! - Every long-running task owns a stop signal; nothing is detached
//! - Stopping a task waits for it, so no fetch outlives shutdown
//! - In-flight work that loses the race with shutdown is dropped, not published

pub mod signals;
pub mod stop;
pub mod task;

pub use stop::{StopListener, StopSignal};
pub use task::BackgroundTask;
