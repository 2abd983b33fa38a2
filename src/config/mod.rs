//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared by value / Arc with subsystems at startup
//!
//! Catalog file (routes, projects, monitors):
//!     watcher.rs detects change
//!     → catalog::load_catalog
//!     → update channel → MemoryRouteStore::replace_catalog + monitor restart
//! ```
//!
//! # Design Decisions
//! - Process config is immutable once loaded; only the catalog hot-reloads
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - A catalog that fails to load is logged and the current one kept

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CatalogConfig, EngineConfig, ListenerConfig, ObservabilityConfig, ProxyConfig,
    StoreBackend, StoreConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::CatalogWatcher;
