//! Shared utilities for integration testing.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use sse_bridge::config::{BridgeConfig, ReadinessStrategy};
use sse_bridge::lifecycle::{startup, Coordinator};

/// What the mock backend answers for one method.
pub enum Reply {
    Result(Value),
    Error(i64, &'static str),
    Status(u16),
}

/// Every request the mock backend received.
#[derive(Clone, Default)]
pub struct Recorded {
    inner: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

impl Recorded {
    /// Method names in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.inner.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Session header the backend saw on the last call to `method`.
    pub fn session_for(&self, method: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(m, _)| m == method)
            .and_then(|(_, s)| s.clone())
    }

    pub fn count(&self, method: &str) -> usize {
        self.inner.lock().unwrap().iter().filter(|(m, _)| m == method).count()
    }
}

type Script = dyn Fn(&str, &Value) -> Reply + Send + Sync;

#[derive(Clone)]
struct MockState {
    script: Arc<Script>,
    recorded: Recorded,
}

/// Start a programmable JSON-RPC backend on a loopback port.
///
/// Handles the handshake itself, hands out the session id `backend-session`,
/// and answers every other method through `script`.
pub async fn start_programmable_backend<F>(script: F) -> (SocketAddr, Recorded)
where
    F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
{
    let recorded = Recorded::default();
    let state = MockState {
        script: Arc::new(script),
        recorded: recorded.clone(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/mcp", post(handle)).with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, recorded)
}

/// Backend whose methods echo their name and params.
pub async fn start_echo_backend() -> (SocketAddr, Recorded) {
    start_programmable_backend(|method, params| {
        Reply::Result(json!({ "method": method, "params": params }))
    })
    .await
}

async fn handle(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let method = body["method"].as_str().unwrap_or_default().to_string();
    let session = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.recorded.inner.lock().unwrap().push((method.clone(), session));

    if body.get("id").is_none() {
        return StatusCode::ACCEPTED.into_response();
    }
    let id = body["id"].clone();

    let reply = if method == "initialize" {
        Reply::Result(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}, "resources": {}, "prompts": {}},
            "serverInfo": {"name": "mock-backend", "version": "1.0.0"}
        }))
    } else {
        (state.script)(&method, &body["params"])
    };

    let mut response = match reply {
        Reply::Result(result) => Json(json!({"jsonrpc": "2.0", "id": id, "result": result})).into_response(),
        Reply::Error(code, message) => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": code, "message": message}
        }))
        .into_response(),
        Reply::Status(status) => StatusCode::from_u16(status).unwrap().into_response(),
    };
    response
        .headers_mut()
        .insert("mcp-session-id", "backend-session".parse().unwrap());
    response
}

/// Bridge configuration pointing at `backend` and supervising `program`.
pub fn bridge_config(backend: SocketAddr, program: &str, args: &[&str]) -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.backend.program = program.into();
    config.backend.args = args.iter().map(|s| s.to_string()).collect();
    config.backend.host = backend.ip().to_string();
    config.backend.port = backend.port();
    config.backend.workspace = std::env::temp_dir();
    config.backend.call_timeout_ms = 5_000;
    config.readiness.strategy = ReadinessStrategy::Probe;
    config.readiness.max_attempts = 50;
    config.readiness.base_delay_ms = 10;
    config.readiness.max_delay_ms = 50;
    config.shutdown.grace_period_ms = 500;
    config
}

/// A bridge serving on a loopback port.
pub struct RunningBridge {
    pub addr: SocketAddr,
    pub coordinator: Arc<Coordinator>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), startup::StartupError>>,
}

impl RunningBridge {
    pub async fn start(config: BridgeConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let coordinator = Arc::new(Coordinator::new(config));
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(startup::serve(coordinator.clone(), listener, async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            coordinator,
            stop: Some(stop),
            task,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn health(&self) -> Value {
        http_client()
            .get(self.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Stop the bridge and wait for the serve task.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("bridge did not stop")
            .unwrap()
            .unwrap();
    }
}

/// Loopback client that ignores proxy settings.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// One server-sent event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Minimal client for the streaming endpoint.
pub struct SseClient {
    http: reqwest::Client,
    base: String,
    pub endpoint: String,
    events: mpsc::UnboundedReceiver<SseEvent>,
    reader: JoinHandle<()>,
}

impl SseClient {
    /// Open the stream and wait for the `endpoint` event.
    pub async fn connect(bridge: &RunningBridge) -> Self {
        let http = http_client();
        let response = http.get(bridge.url("/sse")).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let (tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();
            while let Some(Ok(chunk)) = body.next().await {
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(end) = buffer.find("\n\n") {
                    let block: String = buffer.drain(..end + 2).collect();
                    if let Some(event) = parse_event(&block) {
                        if tx.send(event).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let mut client = Self {
            http,
            base: format!("http://{}", bridge.addr),
            endpoint: String::new(),
            events,
            reader,
        };
        let first = client.next_event().await;
        assert_eq!(first.event, "endpoint");
        client.endpoint = first.data;
        client
    }

    pub async fn next_event(&mut self) -> SseEvent {
        tokio::time::timeout(Duration::from_secs(10), self.events.recv())
            .await
            .expect("no event in time")
            .expect("stream ended")
    }

    /// Post a message and return the HTTP status.
    pub async fn post(&self, message: Value) -> reqwest::StatusCode {
        self.http
            .post(format!("{}{}", self.base, self.endpoint))
            .json(&message)
            .send()
            .await
            .unwrap()
            .status()
    }

    /// Post a request and wait for its response on the stream.
    pub async fn call(&mut self, id: i64, method: &str, params: Value) -> Value {
        let status = self
            .post(json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await;
        assert_eq!(status, reqwest::StatusCode::ACCEPTED);

        loop {
            let event = self.next_event().await;
            assert_eq!(event.event, "message");
            let message: Value = serde_json::from_str(&event.data).unwrap();
            if message["id"] == json!(id) {
                return message;
            }
        }
    }

    /// Complete the downstream handshake.
    pub async fn initialize(&mut self) -> Value {
        let result = self
            .call(
                0,
                "initialize",
                json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "integration-test", "version": "0"}
                }),
            )
            .await;
        let status = self
            .post(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .await;
        assert_eq!(status, reqwest::StatusCode::ACCEPTED);
        result
    }

    /// Close the stream.
    pub fn disconnect(self) {
        self.reader.abort();
    }
}

fn parse_event(block: &str) -> Option<SseEvent> {
    let mut event = String::from("message");
    let mut data = Vec::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("event:") {
            event = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
    }
    (!data.is_empty()).then(|| SseEvent {
        event,
        data: data.join("\n"),
    })
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..250 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
