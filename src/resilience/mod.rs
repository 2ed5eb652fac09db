//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Forwarded call:
//!     → timeouts.rs (per-call deadline, session cancellation)
//!
//! Readiness probe / restart policy:
//!     → backoff.rs (delay between attempts)
//! ```
//!
//! # Design Decisions
//! - Every forwarded call can carry a deadline
//! - Closing a session abandons its in-flight calls
//! - Probe and restart delays are jittered

pub mod backoff;
pub mod timeouts;

pub use backoff::Backoff;
pub use timeouts::{with_deadline, Interrupted};
