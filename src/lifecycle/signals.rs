//! OS signal handling.
//!
//! SIGTERM and Ctrl-C trigger graceful shutdown. SIGHUP reloads the
//! configuration file: the new config is validated, the log level is
//! reapplied, and the accept loop receives the swap; a file that fails to
//! load keeps the previous configuration running.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::config::{load_config, ProxyConfig};
use crate::observability::logging::LogLevelHandle;

/// Resolve when the process is asked to stop (Ctrl-C, or SIGTERM on Unix).
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Reload the config file on every SIGHUP and push the result onto the
/// update channel. No-op on platforms without SIGHUP.
pub fn spawn_reload_on_sighup(
    path: PathBuf,
    updates: mpsc::UnboundedSender<ProxyConfig>,
    log_handle: LogLevelHandle,
) {
    #[cfg(unix)]
    {
        tokio::spawn(async move {
            let mut hangup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(signal) => signal,
                    Err(error) => {
                        tracing::warn!(%error, "SIGHUP handler unavailable, hot reload disabled");
                        return;
                    }
                };
            while hangup.recv().await.is_some() {
                match load_config(&path) {
                    Ok(config) => {
                        log_handle.set_level(&config.logging.level);
                        tracing::info!(
                            path = %path.display(),
                            upstreams = config.upstreams.len(),
                            level = %config.logging.level,
                            "Configuration reloaded"
                        );
                        if updates.send(config).is_err() {
                            return;
                        }
                    }
                    Err(error) => {
                        tracing::error!(
                            path = %path.display(),
                            %error,
                            "Reload failed, keeping previous configuration"
                        );
                    }
                }
            }
        });
    }
    #[cfg(not(unix))]
    {
        let _ = (path, updates, log_handle);
        tracing::debug!("SIGHUP reload is not available on this platform");
    }
}
