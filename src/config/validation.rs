//! Configuration validation logic.

use crate::config::schema::{split_host_port, ProxyConfig};

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Validation error: {}", self.0)
    }
}

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warning", "error"];

/// Validate a ProxyConfig for semantic correctness.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // 1. The upstream list must be non-empty and each entry well-formed.
    if config.upstreams.is_empty() {
        errors.push(ValidationError(
            "upstreams must contain at least one entry".to_string(),
        ));
    }
    for upstream in &config.upstreams {
        if upstream.host.trim().is_empty() {
            errors.push(ValidationError(format!(
                "upstream with port {} has an empty host",
                upstream.port
            )));
        }
        if upstream.port == 0 {
            errors.push(ValidationError(format!(
                "upstream '{}' has port 0",
                upstream.host
            )));
        }
    }

    // 2. Listen addresses must parse as host:port.
    if split_host_port(&config.listen.0).is_none() {
        errors.push(ValidationError(format!(
            "listen '{}' is not a valid host:port",
            config.listen.0
        )));
    }
    if split_host_port(&config.metrics_listen.0).is_none() {
        errors.push(ValidationError(format!(
            "metrics_listen '{}' is not a valid host:port",
            config.metrics_listen.0
        )));
    }

    // 3. Log level must be one of the known names.
    if !LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
        errors.push(ValidationError(format!(
            "logging.level '{}' must be one of debug, info, warning, error",
            config.logging.level
        )));
    }

    // 4. Zero limits would deadlock every acquisition.
    if config.limits.max_client_conns == 0 {
        errors.push(ValidationError(
            "limits.max_client_conns must be > 0".to_string(),
        ));
    }
    if config.limits.max_conns_per_upstream == 0 {
        errors.push(ValidationError(
            "limits.max_conns_per_upstream must be > 0".to_string(),
        ));
    }

    // Zero timeouts are legal (unbounded) but usually a mistake together.
    if config.timeouts.connect_ms == 0 && config.timeouts.total_ms == 0 {
        tracing::warn!("connect and total timeouts are both unbounded");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
