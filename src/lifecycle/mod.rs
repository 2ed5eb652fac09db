//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Metrics → Bind listener → Serve
//!
//! First downstream connection (coordinator.rs):
//!     Launch backend → Await readiness → Handshake (once)
//!
//! Shutdown (coordinator.rs, shutdown.rs):
//!     Signal received → Terminate backend → Close backend client
//!     → Close sessions → Broadcast → Listener drains
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```

pub mod coordinator;
pub mod shutdown;
pub mod signals;
pub mod startup;

pub use coordinator::{BridgeError, Coordinator, TransportFactory};
pub use shutdown::Shutdown;
