//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    /// Public listener (downstream clients connect here).
    pub listener: ListenerConfig,

    /// Backend process invocation and endpoint.
    pub backend: BackendConfig,

    /// How the bridge decides the backend is accepting requests.
    pub readiness: ReadinessConfig,

    /// What happens when the backend process exits.
    pub restart: RestartConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Public listen host.
    pub host: String,

    /// Public listen port.
    pub port: u16,
}

impl ListenerConfig {
    /// The `host:port` string the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// Backend process and endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Executable to launch.
    pub program: String,

    /// Arguments. `{port}` and `{workspace}` are substituted at launch.
    pub args: Vec<String>,

    /// Working directory of the child. Defaults to the workspace.
    pub working_dir: Option<PathBuf>,

    /// Host the backend listens on.
    pub host: String,

    /// Port the backend listens on.
    pub port: u16,

    /// Path of the backend's request/response endpoint.
    pub path: String,

    /// Workspace directory handed to the backend.
    pub workspace: PathBuf,

    /// Fixed identifier reported on the health endpoint.
    pub identifier: String,

    /// Deadline for a single forwarded call in milliseconds (0 disables it).
    pub call_timeout_ms: u64,
}

impl BackendConfig {
    /// Full URL of the backend's request/response endpoint.
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }

    /// URL polled by the readiness probe.
    pub fn probe_url(&self, probe_path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, probe_path)
    }

    /// Arguments with `{port}` and `{workspace}` substituted.
    pub fn resolved_args(&self, workspace: &Path) -> Vec<String> {
        let port = self.port.to_string();
        let workspace = workspace.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{port}", &port).replace("{workspace}", &workspace))
            .collect()
    }

    /// Directory the child is started in.
    pub fn resolved_working_dir(&self, workspace: &Path) -> PathBuf {
        self.working_dir
            .clone()
            .unwrap_or_else(|| workspace.to_path_buf())
    }

    /// Per-call deadline, if any.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: [
                "-m",
                "context_portal_mcp.main",
                "--mode",
                "http",
                "--port",
                "{port}",
                "--workspace_id",
                "{workspace}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            working_dir: None,
            host: "127.0.0.1".to_string(),
            port: 8001,
            path: "/mcp".to_string(),
            workspace: PathBuf::from("."),
            identifier: "python-http".to_string(),
            call_timeout_ms: 30_000,
        }
    }
}

/// Readiness strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStrategy {
    /// Poll the backend until it answers.
    Probe,
    /// Sleep for `warmup_ms` and assume the backend is listening.
    FixedDelay,
}

/// Readiness configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub strategy: ReadinessStrategy,

    /// Duration of the fixed warm-up delay.
    pub warmup_ms: u64,

    /// Path polled by the probe. Any HTTP answer counts as ready.
    pub probe_path: String,

    /// Maximum probe attempts before giving up.
    pub max_attempts: u32,

    /// Base delay between probe attempts.
    pub base_delay_ms: u64,

    /// Maximum delay between probe attempts.
    pub max_delay_ms: u64,

    /// Timeout of a single probe request.
    pub probe_timeout_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            strategy: ReadinessStrategy::Probe,
            warmup_ms: 5000,
            probe_path: "/mcp".to_string(),
            max_attempts: 30,
            base_delay_ms: 100,
            max_delay_ms: 1000,
            probe_timeout_ms: 1000,
        }
    }
}

/// Restart policy kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicyKind {
    /// An exited backend stays exited.
    Never,
    /// Relaunch with jittered exponential backoff, up to `max_restarts` times.
    Backoff,
}

/// Restart configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RestartConfig {
    pub policy: RestartPolicyKind,

    /// Consecutive restarts allowed before the supervisor gives up.
    pub max_restarts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: RestartPolicyKind::Never,
            max_restarts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time the backend gets between SIGTERM and SIGKILL.
    pub grace_period_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: 2000,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
