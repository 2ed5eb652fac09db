//! Remote-procedure protocol subsystem.
//!
//! # Data Flow
//! ```text
//! Downstream (per session):
//!     message.rs (decode JSON-RPC)
//!     → server.rs (handshake, handler table)
//!     → method.rs (which of the six proxied methods)
//!
//! Upstream (shared):
//!     client.rs (handshake, request ids)
//!     → transport.rs (unary send contract)
//! ```
//!
//! # Design Decisions
//! - One server instance per downstream session, one client for the process
//! - Parameters and results stay opaque `serde_json::Value`s
//! - Backend error objects are relayed without rewriting

pub mod client;
pub mod message;
pub mod method;
pub mod server;
pub mod transport;

pub use client::{ForwardError, ProtocolClient};
pub use message::{
    Implementation, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, JSONRPC_VERSION,
    PROTOCOL_VERSION,
};
pub use method::{CallKind, ProxiedMethod};
pub use server::ProtocolServer;
pub use transport::{Transport, TransportError};
