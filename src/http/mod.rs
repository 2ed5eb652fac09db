//! Downstream HTTP subsystem.
//!
//! # Data Flow
//! ```text
//! GET /sse
//!     → server.rs (ensure backend connection, 503 on failure)
//!     → session.rs (register session, own protocol server)
//!     → event stream: `endpoint` event, then one `message` event per response
//!
//! POST /messages?sessionId=<id>
//!     → server.rs (find session, decode JSON-RPC)
//!     → session.rs (dispatch in its own task)
//!     → 202 Accepted; the response goes out on the event stream
//! ```

pub mod server;
pub mod session;

pub use server::{AppState, HttpServer};
pub use session::{Session, SessionGuard, SessionRegistry};
