//! Route catalog subsystem.
//!
//! # Data Flow
//! ```text
//! catalog file (TOML)
//!     → loader.rs (parse, decode middleware options, referential checks)
//!     → Catalog (typed routes, projects, monitors)
//!     → store.rs (MemoryRouteStore: lookups + rolling counters)
//!
//! On catalog change:
//!     config/watcher.rs reloads
//!     → MemoryRouteStore::replace_catalog (counters of surviving routes kept)
//! ```
//!
//! # Design Decisions
//! - Options are decoded once at load; the request path never sees raw config
//! - Counter updates happen inside the store under the entry lock

pub mod loader;
pub mod model;
pub mod store;

use thiserror::Error;

pub use loader::{load_catalog, parse_catalog, Catalog};
pub use model::{
    ApiMethod, Monitor, Pairs, Project, Restriction, Route, RouteStats, Secret, MAX_TTL_SECS,
};
pub use store::{MemoryRouteStore, ResolvedRoute, RouteStore, RouteSummary};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid route '{id}': {reason}")]
    InvalidRoute { id: String, reason: String },

    #[error("invalid monitor '{id}': {reason}")]
    InvalidMonitor { id: String, reason: String },

    #[error("'{owner}' references unknown project '{project}'")]
    UnknownProject { owner: String, project: String },

    #[error("duplicate secret '{name}' in project '{project}'")]
    DuplicateSecret { project: String, name: String },

    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    #[error("route store unavailable: {0}")]
    Unavailable(String),
}
