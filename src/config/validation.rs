//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports non-zero, delays ordered)
//! - Check addresses and paths are well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::BridgeConfig;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.port == 0 {
        errors.push(ValidationError::new("listener.port", "must be non-zero"));
    }
    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::new("listener.host", "must not be empty"));
    }

    let backend = &config.backend;
    if backend.program.trim().is_empty() {
        errors.push(ValidationError::new("backend.program", "must not be empty"));
    }
    if backend.port == 0 {
        errors.push(ValidationError::new("backend.port", "must be non-zero"));
    }
    if !backend.path.starts_with('/') {
        errors.push(ValidationError::new("backend.path", "must start with '/'"));
    }
    let base = format!("http://{}:{}/", backend.host, backend.port);
    if backend.host.trim().is_empty() || url::Url::parse(&base).is_err() {
        errors.push(ValidationError::new(
            "backend.host",
            format!("'{}' does not form a valid URL", base),
        ));
    }

    let readiness = &config.readiness;
    if !readiness.probe_path.starts_with('/') {
        errors.push(ValidationError::new("readiness.probe_path", "must start with '/'"));
    }
    if readiness.max_attempts == 0 {
        errors.push(ValidationError::new("readiness.max_attempts", "must be at least 1"));
    }
    if readiness.base_delay_ms > readiness.max_delay_ms {
        errors.push(ValidationError::new(
            "readiness.base_delay_ms",
            "must not exceed readiness.max_delay_ms",
        ));
    }

    if config.restart.base_delay_ms > config.restart.max_delay_ms {
        errors.push(ValidationError::new(
            "restart.base_delay_ms",
            "must not exceed restart.max_delay_ms",
        ));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level '{}'", observability.log_level),
        ));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
