//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → ProxyState derived per accept loop
//!
//! On SIGHUP:
//!     lifecycle::signals reloads the file
//!     → loader.rs + validation.rs
//!     → new ProxyConfig pushed to the accept loop
//!     → in-flight handlers keep the state they captured
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{LimitsConfig, LoggingConfig, ProxyConfig, TimeoutsConfig, UpstreamConfig};
