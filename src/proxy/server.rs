//! Accept loop and runtime state.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::ProxyConfig;
use crate::limits::ConnectionLimitManager;
use crate::observability::ProxyMetrics;
use crate::proxy::handler::handle_client;
use crate::timeouts::TimeoutPolicy;
use crate::upstream::pool::EmptyPool;
use crate::upstream::UpstreamPool;

/// Everything a handler needs, derived from one configuration.
///
/// A reload builds a fresh `ProxyState` and the accept loop swaps the
/// `Arc`; handlers spawned earlier keep the state they captured, so pool
/// membership, deadlines, and permit capacities stay coherent for the
/// lifetime of each exchange.
#[derive(Debug)]
pub struct ProxyState {
    pub pool: UpstreamPool,
    pub policy: TimeoutPolicy,
    pub limits: ConnectionLimitManager,
}

impl ProxyState {
    pub fn from_config(config: ProxyConfig) -> Result<Self, EmptyPool> {
        let pool = UpstreamPool::new(config.upstream_list())?;
        let policy = config.timeout_policy();
        let limits = ConnectionLimitManager::new(config.connection_limits());
        Ok(Self {
            pool,
            policy,
            limits,
        })
    }
}

/// The proxy server: owns the current state and spawns one handler task
/// per accepted connection.
pub struct ProxyServer {
    state: Arc<ProxyState>,
    metrics: Arc<ProxyMetrics>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, metrics: Arc<ProxyMetrics>) -> Result<Self, EmptyPool> {
        Ok(Self {
            state: Arc::new(ProxyState::from_config(config)?),
            metrics,
        })
    }

    /// Accept connections until the shutdown signal fires.
    ///
    /// `config_updates` delivers reloaded configurations; each one replaces
    /// the state used for subsequent connections.
    pub async fn run(
        mut self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstreams = self.state.pool.len(),
            max_client_conns = self.state.limits.limits().max_client_conns,
            "Proxy listening"
        );

        let mut updates_open = true;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let trace_id = Uuid::new_v4().simple().to_string();
                            let span = tracing::info_span!(
                                "client",
                                trace_id = %trace_id,
                                peer = %peer
                            );
                            let state = self.state.clone();
                            let metrics = self.metrics.clone();
                            tokio::spawn(
                                handle_client(stream, state, metrics, trace_id).instrument(span),
                            );
                        }
                        Err(error) => {
                            tracing::warn!(%error, "Failed to accept connection");
                        }
                    }
                }
                update = config_updates.recv(), if updates_open => {
                    match update {
                        Some(config) => match ProxyState::from_config(config) {
                            Ok(state) => {
                                self.state = Arc::new(state);
                                tracing::info!(
                                    upstreams = self.state.pool.len(),
                                    "Configuration swapped"
                                );
                            }
                            Err(error) => {
                                tracing::warn!(%error, "Ignoring reloaded configuration");
                            }
                        },
                        None => updates_open = false,
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }
        Ok(())
    }
}
