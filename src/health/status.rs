//! Health summary reported on the health endpoint.

use chrono::Utc;
use serde::Serialize;

use crate::protocol::Implementation;
use crate::upstream::BackendProcessState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// The backend was started and is gone.
    Degraded,
}

/// Point-in-time view of the bridge.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    /// RFC 3339 timestamp of the snapshot.
    pub timestamp: String,
    pub server: Implementation,
    /// Fixed backend identifier from the configuration.
    pub backend: String,
    pub backend_alive: bool,
    pub backend_state: &'static str,
    pub sessions: usize,
}

impl HealthSummary {
    pub fn snapshot(backend: &str, state: BackendProcessState, sessions: usize) -> Self {
        let status = match state {
            BackendProcessState::Exited { .. } => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        };

        Self {
            status,
            timestamp: Utc::now().to_rfc3339(),
            server: Implementation::bridge(),
            backend: backend.to_string(),
            backend_alive: state.is_alive(),
            backend_state: state.label(),
            sessions,
        }
    }
}
