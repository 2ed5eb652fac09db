//! Downstream sessions.
//!
//! # Responsibilities
//! - Pair each streaming connection with its own protocol server
//! - Route posted messages to the right session
//! - Push responses onto the session's event stream
//! - Cancel a session's in-flight calls when it goes away
//!
//! # Design Decisions
//! - Sessions share nothing with each other except the backend connection
//! - Every posted message runs in its own task, so a slow call never blocks
//!   the ones behind it

use dashmap::DashMap;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::lifecycle::Coordinator;
use crate::observability::metrics;
use crate::protocol::{Implementation, JsonRpcRequest, ProtocolServer, ProxiedMethod};
use crate::upstream::ProxiedCall;

/// One downstream streaming connection.
pub struct Session {
    id: Uuid,
    remote: Option<SocketAddr>,
    server: Arc<ProtocolServer>,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }

    /// Handle `request` in the background and queue its response, if any.
    pub fn dispatch(&self, request: JsonRpcRequest) {
        let server = self.server.clone();
        let outbound = self.outbound.clone();
        let cancel = self.cancel.clone();
        let session_id = self.id;

        tokio::spawn(async move {
            let method = request.method.clone();
            let response = tokio::select! {
                response = server.handle(request) => response,
                _ = cancel.cancelled() => {
                    tracing::debug!(session_id = %session_id, method = %method, "Session closed, dropping call");
                    return;
                }
            };

            let Some(response) = response else {
                return;
            };
            match serde_json::to_string(&response) {
                Ok(text) => {
                    if outbound.send(text).is_err() {
                        tracing::debug!(session_id = %session_id, method = %method, "Session gone before response");
                    }
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, method = %method, error = %e, "Failed to encode response")
                }
            }
        });
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// All open sessions, keyed by id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session. The receiver yields encoded responses.
    pub fn open(
        &self,
        server: ProtocolServer,
        remote: Option<SocketAddr>,
        cancel: CancellationToken,
    ) -> (Arc<Session>, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            remote,
            server: Arc::new(server),
            outbound,
            cancel,
        });

        self.sessions.insert(session.id, session.clone());
        metrics::set_active_sessions(self.sessions.len());
        tracing::info!(session_id = %session.id, remote = ?remote, "Session opened");
        (session, rx)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Drop a session and cancel its in-flight calls.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<Session>> {
        let removed = self.sessions.remove(id).map(|(_, session)| session);
        if let Some(session) = &removed {
            session.close();
            metrics::set_active_sessions(self.sessions.len());
            tracing::info!(session_id = %id, remote = ?session.remote(), "Session closed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Cancel every session. Their streams end on their own.
    pub fn close_all(&self) {
        let ids: Vec<Uuid> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.remove(&id);
        }
    }
}

/// Removes its session when dropped, i.e. when the event stream ends.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: Uuid,
}

impl SessionGuard {
    pub fn new(registry: Arc<SessionRegistry>, id: Uuid) -> Self {
        Self { registry, id }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

/// Protocol server for one session, forwarding the six proxied methods
/// over the shared backend connection.
pub fn session_server(coordinator: Arc<Coordinator>, cancel: CancellationToken) -> ProtocolServer {
    let mut server = ProtocolServer::new(Implementation::bridge());

    for method in ProxiedMethod::ALL {
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        server.register(method.as_str(), move |params: Option<Value>| {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            async move {
                let call = ProxiedCall::new(method, params);
                match coordinator.ensure_connected().await {
                    Ok(connection) => call.resolve(&connection, &cancel).await,
                    Err(e) => call.unavailable(&e),
                }
            }
        });
    }

    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcError;
    use serde_json::json;
    use std::time::Duration;

    fn echo_server() -> ProtocolServer {
        let mut server = ProtocolServer::new(Implementation::bridge());
        server.register("tools/call", |params: Option<Value>| async move {
            Ok::<_, JsonRpcError>(json!({ "echo": params }))
        });
        server.register("prompts/get", |_params: Option<Value>| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, JsonRpcError>(json!({}))
        });
        server
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_queues_response() {
        let registry = SessionRegistry::new();
        let (session, mut rx) = registry.open(echo_server(), None, CancellationToken::new());

        session.dispatch(JsonRpcRequest::new(7, "tools/call", Some(json!({"name": "x"}))));
        let response = next(&mut rx).await;
        assert_eq!(response["id"], 7);
        assert_eq!(response["result"]["echo"]["name"], "x");

        session.dispatch(JsonRpcRequest::new(8, "nope", None));
        let response = next(&mut rx).await;
        assert_eq!(response["error"]["code"], JsonRpcError::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_produce_nothing() {
        let registry = SessionRegistry::new();
        let (session, mut rx) = registry.open(echo_server(), None, CancellationToken::new());

        session.dispatch(JsonRpcRequest::notification("notifications/initialized", None));
        session.dispatch(JsonRpcRequest::new(1, "ping", None));

        let response = next(&mut rx).await;
        assert_eq!(response["id"], 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_call_does_not_block_later_ones() {
        let registry = SessionRegistry::new();
        let (session, mut rx) = registry.open(echo_server(), None, CancellationToken::new());

        session.dispatch(JsonRpcRequest::new(1, "prompts/get", None));
        session.dispatch(JsonRpcRequest::new(2, "tools/call", None));
        assert_eq!(next(&mut rx).await["id"], 2);
    }

    #[tokio::test]
    async fn test_remove_cancels_only_that_session() {
        let registry = Arc::new(SessionRegistry::new());
        let (a, _rx_a) = registry.open(echo_server(), None, CancellationToken::new());
        let (b, mut rx_b) = registry.open(echo_server(), None, CancellationToken::new());
        assert_eq!(registry.len(), 2);

        drop(SessionGuard::new(registry.clone(), a.id()));
        assert!(a.is_closed());
        assert!(registry.get(&a.id()).is_none());

        assert!(!b.is_closed());
        b.dispatch(JsonRpcRequest::new(3, "tools/call", None));
        assert_eq!(next(&mut rx_b).await["id"], 3);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = registry.open(echo_server(), None, CancellationToken::new());
        let (b, _rx_b) = registry.open(echo_server(), None, CancellationToken::new());

        registry.close_all();
        assert!(registry.is_empty());
        assert!(a.cancel_token().is_cancelled());
        assert!(b.cancel_token().is_cancelled());
    }
}
