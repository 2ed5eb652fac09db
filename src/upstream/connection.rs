//! The single shared connection to the backend.
//!
//! One handshake serves every downstream session. When the supervisor
//! relaunches the backend the generation counter moves and the next call
//! repeats the handshake before it is forwarded.

use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;
use crate::protocol::{
    CallKind, ForwardError, JsonRpcError, ProtocolClient, ProxiedMethod, TransportError,
};

/// Handshaken client shared by all sessions.
pub struct BackendConnection {
    client: ProtocolClient,
    generation: watch::Receiver<u64>,
    handshake_generation: AtomicU64,
    rehandshake: Mutex<()>,
    call_timeout: Option<Duration>,
}

impl BackendConnection {
    /// Handshake with a ready backend.
    ///
    /// `generation` is the supervisor's launch counter; the value seen now is
    /// the one this handshake belongs to.
    pub async fn open(
        client: ProtocolClient,
        generation: watch::Receiver<u64>,
        call_timeout: Option<Duration>,
    ) -> Result<Self, ForwardError> {
        let current = *generation.borrow();
        client.connect().await?;

        Ok(Self {
            client,
            generation,
            handshake_generation: AtomicU64::new(current),
            rehandshake: Mutex::new(()),
            call_timeout,
        })
    }

    pub fn server_info(&self) -> Option<Value> {
        self.client.server_info().map(|info| info.as_ref().clone())
    }

    /// Send one call to the backend and wait for its result.
    pub async fn forward(
        &self,
        method: ProxiedMethod,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Value, ForwardError> {
        self.refresh().await?;

        let started = Instant::now();
        let result = self
            .client
            .request_with(method.as_str(), params, self.call_timeout, cancel)
            .await;
        metrics::record_forward(method.as_str(), outcome(&result), started);
        result
    }

    /// Repeat the handshake if the backend was relaunched since the last one.
    async fn refresh(&self) -> Result<(), ForwardError> {
        if *self.generation.borrow() == self.handshake_generation.load(Ordering::SeqCst) {
            return Ok(());
        }

        let _guard = self.rehandshake.lock().await;
        let current = *self.generation.borrow();
        if current == self.handshake_generation.load(Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!(generation = current, "Backend was relaunched, repeating handshake");
        self.client.connect().await?;
        self.handshake_generation.store(current, Ordering::SeqCst);
        Ok(())
    }

    pub async fn close(&self) -> Result<(), TransportError> {
        self.client.close().await
    }
}

fn outcome(result: &Result<Value, ForwardError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(ForwardError::Backend(_)) => "backend_error",
        Err(ForwardError::Transport(_)) => "transport_error",
        Err(ForwardError::Timeout(_)) => "timeout",
        Err(ForwardError::Cancelled) => "cancelled",
    }
}

/// One downstream call bound for the backend.
#[derive(Debug, Clone)]
pub struct ProxiedCall {
    pub method: ProxiedMethod,
    pub params: Option<Value>,
}

impl ProxiedCall {
    pub fn new(method: ProxiedMethod, params: Option<Value>) -> Self {
        Self { method, params }
    }

    /// Forward the call and shape the outcome for the downstream caller.
    ///
    /// List calls never fail: any error becomes the empty listing. Detail
    /// calls relay the error.
    pub async fn resolve(
        self,
        connection: &BackendConnection,
        cancel: &CancellationToken,
    ) -> Result<Value, JsonRpcError> {
        let method = self.method;
        match connection.forward(method, self.params, cancel).await {
            Ok(result) => Ok(result),
            Err(e) => settle(method, &e, e.to_rpc_error()),
        }
    }

    /// Outcome when no backend connection could be obtained.
    pub fn unavailable(self, reason: &dyn fmt::Display) -> Result<Value, JsonRpcError> {
        settle(self.method, reason, JsonRpcError::internal(reason.to_string()))
    }
}

fn settle(
    method: ProxiedMethod,
    reason: &dyn fmt::Display,
    error: JsonRpcError,
) -> Result<Value, JsonRpcError> {
    match (method.kind(), method.empty_result()) {
        (CallKind::List, Some(empty)) => {
            tracing::warn!(method = %method, error = %reason, "List call failed, returning empty result");
            Ok(empty)
        }
        _ => {
            tracing::warn!(method = %method, error = %reason, "Forwarded call failed");
            Err(error)
        }
    }
}
