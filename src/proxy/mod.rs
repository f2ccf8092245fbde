//! Proxy core: accept loop and the per-connection handler.
//!
//! # Data Flow
//! ```text
//! Client TCP connection
//!     → server.rs (accept, trace id, spawn task)
//!     → handler.rs:
//!         client permit → parse preamble → round-robin upstream
//!         → upstream permit → connect (deadline)
//!         → stream request up, pump response down (deadlines, drain)
//!         → release everything on every exit path
//! ```
//!
//! # Design Decisions
//! - One task per client; no sockets shared across tasks
//! - Permits and sockets are RAII, so cancellation cannot leak them
//! - The accept loop holds the current state and swaps it on reload;
//!   in-flight handlers keep the state they captured

pub mod handler;
pub mod server;

pub use server::{ProxyServer, ProxyState};
