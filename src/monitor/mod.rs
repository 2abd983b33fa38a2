//! Uptime monitors.
//!
//! # Data Flow
//! ```text
//! catalog monitors
//!     → registry.rs (one tokio task per monitor id, fixed interval)
//!     → probe.rs (rendered GET against the monitored URL)
//!     → MonitorLogStore (latest results per monitor, newest first)
//! ```
//!
//! # Design Decisions
//! - A probe records whatever status the endpoint answers with; unreachable
//!   endpoints are logged with status 0
//! - Each tick re-reads the monitor from the store so catalog edits apply
//!   without a restart
//! - Starting a monitor that is already running replaces its task

pub mod probe;
pub mod registry;

pub use probe::{probe, MonitorLog, MonitorLogStore};
pub use registry::MonitorRegistry;
