//! HTTP server setup and handlers.
//!
//! # Responsibilities
//! - Create the Axum router with the streaming, message, info and health routes
//! - Wire up middleware (tracing, CORS)
//! - Open a session per streaming connection and feed its event stream
//! - Accept posted messages and hand them to their session
//! - Stop on the coordinator's shutdown broadcast

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, Request, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::http::session::{session_server, SessionGuard};
use crate::lifecycle::{shutdown, Coordinator};
use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

pub const SSE_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages";
pub const HEALTH_PATH: &str = "/health";

const DOCUMENTATION: &str = "https://modelcontextprotocol.io/docs/concepts/transports";
const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

/// Public face of the bridge.
pub struct HttpServer {
    router: Router,
    coordinator: Arc<Coordinator>,
}

impl HttpServer {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        let state = AppState {
            coordinator: coordinator.clone(),
        };
        Self {
            router: Self::build_router(state),
            coordinator,
        }
    }

    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/", get(info_handler))
            .route(HEALTH_PATH, get(health_handler))
            .route(SSE_PATH, get(sse_handler))
            .route(MESSAGES_PATH, post(message_handler))
            .with_state(state)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// The router, for serving elsewhere or driving in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until the coordinator broadcasts shutdown.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            sse = SSE_PATH,
            messages = MESSAGES_PATH,
            "HTTP server starting"
        );

        let stopped = self.coordinator.shutdown_handle().subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown::wait(stopped))
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn info_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Streaming (HTTP+SSE) front end for a request/response JSON-RPC backend",
        "documentation": DOCUMENTATION,
        "endpoints": {
            "sse": SSE_PATH,
            "messages": MESSAGES_PATH,
            "health": HEALTH_PATH,
        }
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.coordinator.health())
}

/// Open a session and stream its responses.
///
/// The first event tells the client where to post its messages.
async fn sse_handler(State(state): State<AppState>, request: Request) -> Response {
    let remote = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    if let Err(e) = state.coordinator.ensure_connected().await {
        tracing::error!(remote = ?remote, error = %e, "Rejecting stream connection");
        return e.into_response();
    }

    let sessions = state.coordinator.sessions().clone();
    let cancel = CancellationToken::new();
    let server = session_server(state.coordinator.clone(), cancel.clone());
    let (session, rx) = sessions.open(server, remote, cancel.clone());
    let guard = SessionGuard::new(sessions, session.id());

    let endpoint = format!("{}?sessionId={}", MESSAGES_PATH, session.id().simple());
    let first = stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    });

    let messages = stream::unfold((rx, cancel, guard), |(mut rx, cancel, guard)| async move {
        let text = tokio::select! {
            text = rx.recv() => text?,
            _ = cancel.cancelled() => return None,
        };
        let event = Event::default().event("message").data(text);
        Some((Ok::<_, Infallible>(event), (rx, cancel, guard)))
    });

    Sse::new(first.chain(messages))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE))
        .into_response()
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

/// Accept one posted message. The response travels on the event stream.
async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(session) = state.coordinator.sessions().get(&query.session_id) else {
        tracing::debug!(session_id = %query.session_id, "Message for unknown session");
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };

    let request: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(session_id = %query.session_id, error = %e, "Malformed message");
            let error = JsonRpcResponse::failure(None, JsonRpcError::parse_error(e));
            return (StatusCode::BAD_REQUEST, Json(error)).into_response();
        }
    };

    tracing::debug!(session_id = %query.session_id, method = %request.method, "Message accepted");
    session.dispatch(request);
    StatusCode::ACCEPTED.into_response()
}
