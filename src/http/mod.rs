//! HTTP/1.1 framing.
//!
//! # Data Flow
//! ```text
//! client socket (buffered reader)
//!     → request.rs (parse preamble, classify body)
//!     → handler forwards: request.rs emits preamble + streams body
//!     → response bytes relayed verbatim (never parsed beyond the
//!       best-effort status line in response.rs)
//! ```
//!
//! # Design Decisions
//! - Limits checked during parse, before any forwarding
//! - Headers kept in arrival order; lookup is case-insensitive
//! - `Connection: close` forced on the upstream leg so EOF terminates
//!   the response

pub mod request;
pub mod response;

pub use request::{BodyKind, RequestHead};
