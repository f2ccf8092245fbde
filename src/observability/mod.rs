//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Handlers produce:
//!     → logging.rs (tracing events, trace_id + upstream fields)
//!     → metrics.rs (atomic counter increments)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → GET /metrics on the metrics listener (Prometheus text format)
//! ```
//!
//! # Design Decisions
//! - Metric updates are atomic increments; no locks on the hot path
//! - The sink is owned and passed explicitly, so tests build fresh ones
//! - The log level comes from config and can be swapped on reload

pub mod logging;
pub mod metrics;

pub use metrics::ProxyMetrics;
