//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Supervisor, backend connection, sessions produce:
//!     → logging.rs (structured log events on stderr)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stderr, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Logs go to stderr so stdout stays free for the stdio mode
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
