//! Backend transport adapter: one HTTP POST per message.
//!
//! # Responsibilities
//! - Serialize outgoing messages and POST them to the backend endpoint
//! - Parse JSON or event-stream response bodies
//! - Carry the backend's session header across requests
//!
//! # Design Decisions
//! - No persistent socket: `start` only resets the session, `close` holds no resources
//! - A non-success status with a protocol error body is still a response
//! - Empty bodies are only valid as notification acknowledgements

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use url::Url;

use crate::config::BackendConfig;
use crate::protocol::message::{JsonRpcRequest, JsonRpcResponse};
use crate::protocol::transport::{Transport, TransportError};

/// Header the backend uses to bind requests to its session.
pub const SESSION_HEADER: &str = "mcp-session-id";

const MAX_ERROR_BODY: usize = 512;

/// Unary HTTP transport to a fixed backend endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    session: ArcSwapOption<String>,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(endpoint: Url) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            session: ArcSwapOption::empty(),
            closed: AtomicBool::new(false),
        })
    }

    /// Transport pointed at the configured backend endpoint.
    pub fn from_config(backend: &BackendConfig) -> Result<Self, TransportError> {
        let endpoint = Url::parse(&backend.endpoint()).map_err(|e| {
            TransportError::Connect(format!("invalid backend endpoint '{}': {}", backend.endpoint(), e))
        })?;
        Self::new(endpoint)
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Session id handed out by the backend, if any.
    pub fn session_id(&self) -> Option<Arc<String>> {
        self.session.load_full()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// Forget any backend session so the next handshake opens a new one.
    async fn start(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.session.store(None);
        Ok(())
    }

    async fn send(&self, message: &JsonRpcRequest) -> Result<Option<JsonRpcResponse>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let body = serde_json::to_vec(message)?;
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .body(body);
        if let Some(session) = self.session.load_full() {
            request = request.header(SESSION_HEADER, session.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session.store(Some(Arc::new(session.to_string())));
        }

        let status = response.status();
        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::trace!(method = %message.method, status = %status, bytes = text.len(), "Backend responded");
        decode_body(status, event_stream, &text)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Turn a backend HTTP answer into a protocol response.
fn decode_body(
    status: StatusCode,
    event_stream: bool,
    text: &str,
) -> Result<Option<JsonRpcResponse>, TransportError> {
    if text.trim().is_empty() {
        return if status.is_success() {
            Ok(None)
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                body: String::new(),
            })
        };
    }

    let parsed = if event_stream {
        parse_event_stream(text)
    } else {
        serde_json::from_str::<JsonRpcResponse>(text).ok()
    };

    match parsed {
        Some(response) => Ok(Some(response)),
        None if !status.is_success() => Err(TransportError::Status {
            status: status.as_u16(),
            body: text.chars().take(MAX_ERROR_BODY).collect(),
        }),
        None => Err(TransportError::Decode(
            text.chars().take(MAX_ERROR_BODY).collect(),
        )),
    }
}

/// Last protocol response carried in an event-stream body.
pub fn parse_event_stream(text: &str) -> Option<JsonRpcResponse> {
    let mut last = None;
    let mut data = String::new();

    let mut flush = |data: &mut String| {
        if !data.is_empty() {
            match serde_json::from_str::<JsonRpcResponse>(data) {
                Ok(response) if response.result.is_some() || response.error.is_some() => {
                    last = Some(response);
                }
                _ => {}
            }
            data.clear();
        }
    };

    for line in text.lines() {
        if line.is_empty() {
            flush(&mut data);
        } else if let Some(payload) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(payload.strip_prefix(' ').unwrap_or(payload));
        }
    }
    flush(&mut data);

    last
}
