//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Engine, stages, monitors produce:
//!     → logging.rs (tracing subscriber, env filter)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (structured log lines)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through spans via the HTTP trace layer
//! - Metric updates are no-ops until a recorder is installed
//! - Secret values never appear in log fields; routes are identified by id

pub mod logging;
pub mod metrics;
