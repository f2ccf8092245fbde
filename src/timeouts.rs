//! Timeout enforcement for proxy operations.
//!
//! # Responsibilities
//! - Wrap pending operations with per-phase deadlines
//! - Distinguish connect, read, write, and total phases
//! - Cancel operations cleanly on expiry
//!
//! # Design Decisions
//! - Uses Tokio's timeout facility; dropping the wrapped future cancels
//!   in-flight I/O
//! - A zero value disables the bound for that phase
//! - Timeout errors are distinct from other errors and carry their phase

use std::future::Future;
use std::time::Duration;

use crate::error::ProxyError;

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Connect,
    Read,
    Write,
    Total,
}

impl TimeoutKind {
    /// Label used in logs and in the `proxy_timeout_errors_total` metric.
    pub fn as_str(self) -> &'static str {
        match self {
            TimeoutKind::Connect => "connect",
            TimeoutKind::Read => "read",
            TimeoutKind::Write => "write",
            TimeoutKind::Total => "total",
        }
    }
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-phase deadlines in milliseconds.
///
/// The operation is handed over in a not-yet-polled form so the wrapper
/// owns its scheduling; on expiry the future is dropped, which cancels
/// any pending socket operation inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub connect_ms: u64,
    pub read_ms: u64,
    pub write_ms: u64,
    pub total_ms: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            connect_ms: 1_000,
            read_ms: 15_000,
            write_ms: 15_000,
            total_ms: 30_000,
        }
    }
}

impl TimeoutPolicy {
    /// Bound `fut` by the connect deadline.
    pub async fn with_connect<F: Future>(&self, fut: F) -> Result<F::Output, ProxyError> {
        self.bounded(self.connect_ms, TimeoutKind::Connect, fut).await
    }

    /// Bound `fut` by the read deadline.
    pub async fn with_read<F: Future>(&self, fut: F) -> Result<F::Output, ProxyError> {
        self.bounded(self.read_ms, TimeoutKind::Read, fut).await
    }

    /// Bound `fut` by the write deadline.
    pub async fn with_write<F: Future>(&self, fut: F) -> Result<F::Output, ProxyError> {
        self.bounded(self.write_ms, TimeoutKind::Write, fut).await
    }

    /// Bound `fut` by the total deadline. This wraps a whole exchange, so
    /// inner per-operation deadlines nest inside it; whichever expires
    /// first wins and cancellation propagates inward.
    pub async fn with_total<F: Future>(&self, fut: F) -> Result<F::Output, ProxyError> {
        self.bounded(self.total_ms, TimeoutKind::Total, fut).await
    }

    async fn bounded<F: Future>(
        &self,
        ms: u64,
        kind: TimeoutKind,
        fut: F,
    ) -> Result<F::Output, ProxyError> {
        if ms == 0 {
            return Ok(fut.await);
        }
        tokio::time::timeout(Duration::from_millis(ms), fut)
            .await
            .map_err(|_| ProxyError::Timeout(kind))
    }
}
