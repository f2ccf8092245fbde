//! Error types shared across the proxy core.

use crate::timeouts::TimeoutKind;

/// Errors produced while handling a single client exchange.
///
/// Every variant is caught at the handler level and mapped to a client
/// response (400/502/504) or a mid-stream termination. Nothing here
/// propagates past the handler task.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Request preamble violates the grammar or one of the parse limits.
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    /// OS-level failure opening the upstream socket (refused, unreachable).
    #[error("upstream connect failed: {0}")]
    Connect(#[source] std::io::Error),

    /// A phase deadline fired.
    #[error("{0} timeout")]
    Timeout(TimeoutKind),

    /// Remote side closed the connection mid-exchange.
    #[error("peer closed connection")]
    PeerClosed,

    /// Any other socket-level failure while relaying.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
