//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → validate → init logging/metrics → bind → run
//!
//! Signals (signals.rs):
//!     SIGTERM / Ctrl-C → Shutdown::trigger → accept loop stops
//!     SIGHUP → reload config file → push onto the update channel
//! ```
//!
//! # Design Decisions
//! - Shutdown stops accepting; in-flight exchanges finish on their own
//!   deadlines
//! - SIGHUP means reload, never shutdown; a bad file keeps the old config

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
