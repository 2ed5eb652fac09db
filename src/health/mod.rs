//! Backend health.
//!
//! # Data Flow
//! ```text
//! Startup (probe.rs):
//!     Supervisor spawned child
//!     → Poll backend until any HTTP answer
//!     → Starting → Running
//!
//! Runtime (status.rs):
//!     Supervisor state watch + session count
//!     → HealthSummary
//!     → GET /health
//! ```
//!
//! # Design Decisions
//! - Readiness only proves the listener is bound, not application health
//! - Liveness comes from the child-exit monitor, never from a request

pub mod probe;
pub mod status;

pub use probe::ReadinessProbe;
pub use status::{HealthStatus, HealthSummary};
