//! Unary transport contract used by the protocol client.
//!
//! A transport carries one message out and, for requests, exactly one
//! response back. It never delivers unsolicited messages, so it only suits
//! exchanges where the bridge always initiates.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::message::{JsonRpcRequest, JsonRpcResponse};

/// Network or decoding failure while talking to the backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established or broke mid-exchange.
    #[error("connection to backend failed: {0}")]
    Connect(String),

    /// Backend answered with a non-success status and no protocol error body.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not a protocol message.
    #[error("unparseable backend response: {0}")]
    Decode(String),

    /// Outgoing message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transport was closed.
    #[error("transport closed")]
    Closed,
}

/// Request/response transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Prepare the transport. Unary transports have nothing to do.
    async fn start(&self) -> Result<(), TransportError>;

    /// Send one message. Resolves with the parsed response, or `None` when
    /// the peer acknowledged a notification without a body.
    async fn send(&self, message: &JsonRpcRequest) -> Result<Option<JsonRpcResponse>, TransportError>;

    /// Release the transport.
    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod scripted {
    //! In-memory transport driven by a closure.

    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Responder = dyn Fn(&JsonRpcRequest) -> Result<Option<JsonRpcResponse>, TransportError> + Send + Sync;

    /// Transport answering from a closure and recording every method it saw.
    pub struct ScriptedTransport {
        responder: Box<Responder>,
        log: Mutex<Vec<String>>,
        on_close: Option<Box<dyn Fn() + Send + Sync>>,
    }

    impl ScriptedTransport {
        pub fn new<F>(responder: F) -> Self
        where
            F: Fn(&JsonRpcRequest) -> Result<Option<JsonRpcResponse>, TransportError> + Send + Sync + 'static,
        {
            Self {
                responder: Box::new(responder),
                log: Mutex::new(Vec::new()),
                on_close: None,
            }
        }

        /// Backend that completes the handshake and echoes `{"method": ..}`
        /// for every other request.
        pub fn echo() -> Self {
            Self::new(|request| {
                if request.is_notification() {
                    return Ok(None);
                }
                let result = match request.method.as_str() {
                    "initialize" => json!({
                        "protocolVersion": crate::protocol::PROTOCOL_VERSION,
                        "capabilities": {},
                        "serverInfo": {"name": "scripted", "version": "0"}
                    }),
                    other => json!({ "method": other, "params": request.params }),
                };
                Ok(Some(JsonRpcResponse::success(request.id.clone(), result)))
            })
        }

        pub fn with_close_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
            self.on_close = Some(Box::new(hook));
            self
        }

        pub fn methods(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        pub fn into_arc(self) -> Arc<Self> {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn start(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn send(&self, message: &JsonRpcRequest) -> Result<Option<JsonRpcResponse>, TransportError> {
            self.log.lock().unwrap().push(message.method.clone());
            (self.responder)(message)
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.log.lock().unwrap().push("<close>".to_string());
            if let Some(hook) = &self.on_close {
                hook();
            }
            Ok(())
        }
    }
}
