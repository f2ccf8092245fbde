use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use relay_proxy::config::schema::{split_host_port, ListenConfig};
use relay_proxy::config::{load_config, ProxyConfig};
use relay_proxy::lifecycle::{signals, Shutdown};
use relay_proxy::observability::logging;
use relay_proxy::observability::metrics::serve_metrics;
use relay_proxy::observability::ProxyMetrics;
use relay_proxy::proxy::ProxyServer;

#[derive(Parser)]
#[command(name = "relay-proxy")]
#[command(about = "Minimal streaming HTTP/1.1 reverse proxy", version)]
struct Args {
    /// Path to the YAML configuration file. Falls back to environment
    /// variables (PROXY_LISTEN, METRICS_LISTEN, UPSTREAM_HOSTS, LOG_LEVEL)
    /// when the file does not exist.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the listen address from the config (host:port).
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // An unreadable or invalid file at startup is fatal; a missing file
    // falls back to the environment.
    let mut config = if args.config.is_file() {
        load_config(&args.config)?
    } else {
        ProxyConfig::from_env()
    };
    if let Some(listen) = args.listen {
        config.listen = ListenConfig(listen);
    }

    let log_handle = logging::init(&config.logging.level);
    tracing::info!(
        config = %args.config.display(),
        listen = %config.listen.0,
        metrics_listen = %config.metrics_listen.0,
        upstreams = config.upstreams.len(),
        "relay-proxy starting"
    );

    let metrics = Arc::new(ProxyMetrics::new());
    let shutdown = Shutdown::new();

    let (listen_host, listen_port) =
        split_host_port(&config.listen.0).ok_or("invalid listen address")?;
    let listener = TcpListener::bind((listen_host.as_str(), listen_port)).await?;

    let (metrics_host, metrics_port) =
        split_host_port(&config.metrics_listen.0).ok_or("invalid metrics_listen address")?;
    let metrics_listener = TcpListener::bind((metrics_host.as_str(), metrics_port)).await?;

    {
        let metrics = metrics.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(error) = serve_metrics(metrics_listener, metrics, shutdown_rx).await {
                tracing::error!(%error, "Metrics endpoint failed");
            }
        });
    }

    let (updates_tx, updates_rx) = mpsc::unbounded_channel();
    signals::spawn_reload_on_sighup(args.config.clone(), updates_tx, log_handle);

    // Subscribe before the signal task exists so a fast signal cannot be
    // missed.
    let server_shutdown = shutdown.subscribe();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            signals::wait_for_shutdown_signal().await;
            shutdown.trigger();
        });
    }

    let server = ProxyServer::new(config, metrics)?;
    server.run(listener, updates_rx, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
