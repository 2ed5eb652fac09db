//! Server half of the protocol: one instance per downstream session.
//!
//! The server answers the handshake and `ping` itself and dispatches
//! everything else through its handler table.

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::protocol::message::{
    Implementation, JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION, PROTOCOL_VERSION,
};

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, JsonRpcError>> + Send>>;

/// A method handler: parameters in, result or protocol error out.
pub type Handler = Arc<dyn Fn(Option<Value>) -> HandlerFuture + Send + Sync>;

pub struct ProtocolServer {
    info: Implementation,
    handlers: HashMap<String, Handler>,
}

impl ProtocolServer {
    pub fn new(info: Implementation) -> Self {
        Self {
            info,
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `method`, replacing any previous one.
    pub fn register<F, Fut>(&mut self, method: &str, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JsonRpcError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |params: Option<Value>| -> HandlerFuture {
            Box::pin(handler(params))
        });
        self.handlers.insert(method.to_string(), handler);
    }

    /// Capabilities derived from the registered method families.
    pub fn capabilities(&self) -> Value {
        let mut capabilities = Map::new();
        for family in ["resources", "tools", "prompts"] {
            let prefix = format!("{}/", family);
            if self.handlers.keys().any(|m| m.starts_with(&prefix)) {
                capabilities.insert(family.to_string(), json!({}));
            }
        }
        Value::Object(capabilities)
    }

    /// Handle one incoming message. Notifications never produce a response.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::failure(
                request.id,
                JsonRpcError::invalid_request(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
            ));
        }

        if request.is_notification() {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        }

        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            method => match self.handlers.get(method) {
                Some(handler) => handler(request.params).await,
                None => Err(JsonRpcError::method_not_found(method)),
            },
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": self.capabilities(),
            "serverInfo": self.info,
        })
    }
}
