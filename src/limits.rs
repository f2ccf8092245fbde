//! Connection limits via counting semaphores.
//!
//! # Responsibilities
//! - Bound concurrent client connections (global)
//! - Bound concurrent connections per upstream (per identity)
//! - Guarantee release on every exit path, including cancellation
//!
//! # Design Decisions
//! - Acquisition waits; it never fails. Overload turns into queueing
//!   backpressure, not rejection
//! - Permits are owned RAII guards, so dropping a handler task mid-flight
//!   releases its slots
//! - Per-upstream semaphores are created on first use and retained for the
//!   process lifetime

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::upstream::Upstream;

/// Capacity configuration for the two permit classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Maximum simultaneous client connections.
    pub max_client_conns: usize,
    /// Maximum simultaneous connections per upstream identity.
    pub max_conns_per_upstream: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_client_conns: 1_000,
            max_conns_per_upstream: 100,
        }
    }
}

/// A held connection slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// Two-level permit manager: one global client semaphore plus a family of
/// per-upstream semaphores keyed by `"host:port"`.
#[derive(Debug)]
pub struct ConnectionLimitManager {
    limits: ConnectionLimits,
    clients: Arc<Semaphore>,
    upstreams: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ConnectionLimitManager {
    pub fn new(limits: ConnectionLimits) -> Self {
        Self {
            limits,
            clients: Arc::new(Semaphore::new(limits.max_client_conns)),
            upstreams: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> ConnectionLimits {
        self.limits
    }

    /// Wait for a client slot. Connections beyond `max_client_conns` queue
    /// here instead of being refused.
    pub async fn client_connection(&self) -> ConnectionPermit {
        let permit = self
            .clients
            .clone()
            .acquire_owned()
            .await
            .expect("client semaphore closed unexpectedly");
        ConnectionPermit { _permit: permit }
    }

    /// Wait for a slot toward the given upstream. The semaphore for a new
    /// identity is created under the manager-wide mutex on first demand.
    pub async fn upstream_connection(&self, upstream: &Upstream) -> ConnectionPermit {
        let semaphore = self.upstream_semaphore(&upstream.key());
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("upstream semaphore closed unexpectedly");
        ConnectionPermit { _permit: permit }
    }

    fn upstream_semaphore(&self, key: &str) -> Arc<Semaphore> {
        let mut map = self.upstreams.lock().expect("upstream semaphore map poisoned");
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.limits.max_conns_per_upstream)))
            .clone()
    }

    /// Client slots currently held.
    pub fn clients_in_use(&self) -> usize {
        self.limits.max_client_conns - self.clients.available_permits()
    }

    /// Slots currently held toward the given upstream identity. Zero for
    /// identities that never acquired.
    pub fn upstream_in_use(&self, key: &str) -> usize {
        let map = self.upstreams.lock().expect("upstream semaphore map poisoned");
        match map.get(key) {
            Some(sem) => self.limits.max_conns_per_upstream - sem.available_permits(),
            None => 0,
        }
    }
}
