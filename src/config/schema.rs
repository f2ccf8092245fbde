//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from the YAML config
//! file, and every field has a default so a minimal file works.

use serde::{Deserialize, Serialize};

use crate::limits::ConnectionLimits;
use crate::timeouts::TimeoutPolicy;
use crate::upstream::Upstream;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address the accept loop binds, as `host:port`.
    pub listen: ListenConfig,

    /// Address the metrics endpoint binds, as `host:port`.
    pub metrics_listen: MetricsListenConfig,

    /// Ordered upstream list. Round-robin follows this order.
    pub upstreams: Vec<UpstreamConfig>,

    /// Per-phase deadlines.
    pub timeouts: TimeoutsConfig,

    /// Connection limits.
    pub limits: LimitsConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Newtype so `listen` deserializes from a plain string.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ListenConfig(pub String);

impl Default for ListenConfig {
    fn default() -> Self {
        Self("127.0.0.1:8080".to_string())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct MetricsListenConfig(pub String);

impl Default for MetricsListenConfig {
    fn default() -> Self {
        Self("127.0.0.1:8081".to_string())
    }
}

/// A single upstream entry.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9001,
        }
    }
}

/// Per-phase timeouts in milliseconds. Zero disables a phase's bound.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutsConfig {
    pub connect_ms: u64,
    pub read_ms: u64,
    pub write_ms: u64,
    pub total_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: 1_000,
            read_ms: 15_000,
            write_ms: 15_000,
            total_ms: 30_000,
        }
    }
}

/// Connection limit capacities.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_client_conns: usize,
    pub max_conns_per_upstream: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_client_conns: 1_000,
            max_conns_per_upstream: 100,
        }
    }
}

/// Logging settings. Level is one of `debug`, `info`, `warning`, `error`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Split a `host:port` string. The host may be empty (`":8080"`), in which
/// case the loopback default applies.
pub fn split_host_port(value: &str) -> Option<(String, u16)> {
    let value = value.trim();
    let (host, port) = value.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let host = if host.is_empty() { "127.0.0.1" } else { host };
    Some((host.to_string(), port))
}

impl ProxyConfig {
    /// Build the runtime upstream list.
    pub fn upstream_list(&self) -> Vec<Upstream> {
        self.upstreams
            .iter()
            .map(|u| Upstream::new(u.host.clone(), u.port))
            .collect()
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            connect_ms: self.timeouts.connect_ms,
            read_ms: self.timeouts.read_ms,
            write_ms: self.timeouts.write_ms,
            total_ms: self.timeouts.total_ms,
        }
    }

    pub fn connection_limits(&self) -> ConnectionLimits {
        ConnectionLimits {
            max_client_conns: self.limits.max_client_conns,
            max_conns_per_upstream: self.limits.max_conns_per_upstream,
        }
    }

    /// Fallback used when no config file exists: listen addresses and the
    /// upstream list from the environment, defaults for everything else.
    ///
    /// `UPSTREAM_HOSTS` is a comma-separated `host:port` list; entries that
    /// do not parse are skipped with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(listen) = std::env::var("PROXY_LISTEN") {
            if split_host_port(&listen).is_some() {
                config.listen = ListenConfig(listen);
            }
        }
        if let Ok(metrics) = std::env::var("METRICS_LISTEN") {
            if split_host_port(&metrics).is_some() {
                config.metrics_listen = MetricsListenConfig(metrics);
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.logging.level = level;
        }
        let hosts = std::env::var("UPSTREAM_HOSTS").unwrap_or_default();
        for part in hosts.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match split_host_port(part) {
                Some((host, port)) => config.upstreams.push(UpstreamConfig { host, port }),
                None => tracing::warn!(entry = %part, "Invalid upstream entry, skipping"),
            }
        }
        if config.upstreams.is_empty() {
            config.upstreams = vec![
                UpstreamConfig {
                    host: "127.0.0.1".to_string(),
                    port: 9001,
                },
                UpstreamConfig {
                    host: "127.0.0.1".to_string(),
                    port: 9002,
                },
            ];
        }
        config
    }
}
