//! Everything on the backend side of the bridge.
//!
//! # Data Flow
//! ```text
//! supervisor.rs (child process, readiness, restarts)
//!     → generation counter
//!     → connection.rs (one handshake, shared by all sessions)
//!     → transport.rs (one HTTP POST per message)
//!     → Backend
//! ```

pub mod connection;
pub mod supervisor;
pub mod transport;

pub use connection::{BackendConnection, ProxiedCall};
pub use supervisor::{BackendProcessState, LaunchError, RestartPolicy, Supervisor};
pub use transport::{HttpTransport, SESSION_HEADER};
