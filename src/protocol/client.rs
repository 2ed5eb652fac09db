//! Protocol client speaking to the backend over a unary transport.

use arc_swap::ArcSwapOption;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::protocol::message::{Implementation, JsonRpcError, JsonRpcRequest, PROTOCOL_VERSION};
use crate::protocol::transport::{Transport, TransportError};
use crate::resilience::{with_deadline, Interrupted};

/// Failure of one forwarded call.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Backend answered with a protocol-level error.
    #[error("backend call failed: {0}")]
    Backend(JsonRpcError),

    #[error("backend call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The session that issued the call went away.
    #[error("call abandoned: session closed")]
    Cancelled,
}

impl ForwardError {
    /// Error object relayed to the downstream caller.
    ///
    /// Backend errors pass through untouched.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            ForwardError::Backend(error) => error.clone(),
            ForwardError::Transport(error) => {
                JsonRpcError::internal(format!("HTTP request failed: {}", error))
            }
            other => JsonRpcError::internal(other.to_string()),
        }
    }
}

impl From<Interrupted> for ForwardError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::TimedOut(limit) => ForwardError::Timeout(limit),
            Interrupted::Cancelled => ForwardError::Cancelled,
        }
    }
}

/// Client half of the protocol, bound to one transport.
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    info: Implementation,
    next_id: AtomicI64,
    server: ArcSwapOption<Value>,
}

impl ProtocolClient {
    pub fn new(transport: Arc<dyn Transport>, info: Implementation) -> Self {
        Self {
            transport,
            info,
            next_id: AtomicI64::new(1),
            server: ArcSwapOption::empty(),
        }
    }

    /// Perform the handshake: `initialize`, then `notifications/initialized`.
    pub async fn connect(&self) -> Result<Value, ForwardError> {
        self.transport.start().await?;

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": self.info,
        });
        let result = self.request("initialize", Some(params)).await?;
        self.notify("notifications/initialized", None).await?;

        let server = result.get("serverInfo").cloned().unwrap_or_default();
        let protocol_version = result.get("protocolVersion").cloned().unwrap_or_default();
        tracing::info!(%server, %protocol_version, "Backend handshake complete");
        self.server.store(Some(Arc::new(result.clone())));
        Ok(result)
    }

    /// `initialize` result of the last successful handshake.
    pub fn server_info(&self) -> Option<Arc<Value>> {
        self.server.load_full()
    }

    /// Issue a request and wait for its result.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ForwardError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        match self.transport.send(&request).await? {
            Some(response) => response.into_result().map_err(ForwardError::Backend),
            None => Err(TransportError::Decode(format!("no response body for '{}'", method)).into()),
        }
    }

    /// [`request`](Self::request) bounded by a deadline and a cancellation token.
    pub async fn request_with(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<Value, ForwardError> {
        with_deadline(self.request(method, params), deadline, cancel).await?
    }

    /// Send a notification. Any response body is ignored.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ForwardError> {
        let notification = JsonRpcRequest::notification(method, params);
        self.transport.send(&notification).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}
