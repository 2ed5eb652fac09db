//! HTTP+SSE bridge in front of a request/response JSON-RPC backend.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod protocol;
pub mod resilience;
pub mod stdio;
pub mod upstream;

pub use config::schema::BridgeConfig;
pub use http::HttpServer;
pub use lifecycle::{Coordinator, Shutdown};
