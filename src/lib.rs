//! Minimal streaming HTTP/1.1 reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌───────────────────────────────────────────────┐
//!                    │                 RELAY PROXY                    │
//!                    │                                               │
//!   Client ──────────┼─▶ proxy::server (accept, trace id, spawn)     │
//!                    │        │                                      │
//!                    │        ▼                                      │
//!                    │   proxy::handler ──▶ upstream (round-robin)   │
//!                    │        │                  │                   │
//!                    │   http (parse/emit)   limits (permits)        │
//!                    │        │                  │                   │
//!   Client ◀─────────┼── response pump ◀──── upstream socket ◀───────┼── Backend
//!                    │                                               │
//!                    │  cross-cutting: config · timeouts ·           │
//!                    │  observability · lifecycle                    │
//!                    └───────────────────────────────────────────────┘
//! ```
//!
//! One task per client connection. Bodies stream in bounded chunks with a
//! drain barrier after every write; nothing is buffered whole. Each
//! upstream connection is opened fresh, used for one exchange with a
//! forced `Connection: close`, and torn down.

// Core subsystems
pub mod config;
pub mod http;
pub mod proxy;
pub mod upstream;

// Traffic management
pub mod limits;
pub mod timeouts;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::ProxyConfig;
pub use lifecycle::Shutdown;
pub use observability::ProxyMetrics;
pub use proxy::ProxyServer;
