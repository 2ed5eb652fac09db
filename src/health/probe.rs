//! Active readiness probing of the backend.
//!
//! # Responsibilities
//! - Issue one bounded HTTP request against the backend
//! - Report whether the backend's listener answered at all
//!
//! # Design Decisions
//! - Any HTTP status counts: the question is "is the socket bound",
//!   not "is the endpoint happy with a GET"
//! - Connection errors and timeouts count as not ready

use reqwest::header::USER_AGENT;
use std::time::Duration;

pub struct ReadinessProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Probe once.
    pub async fn check(&self) -> bool {
        let request = self
            .client
            .get(&self.url)
            .header(USER_AGENT, "sse-bridge-readiness")
            .timeout(self.timeout);

        match request.send().await {
            Ok(response) => {
                tracing::debug!(url = %self.url, status = %response.status(), "Readiness probe answered");
                true
            }
            Err(e) if e.is_timeout() => {
                tracing::debug!(url = %self.url, "Readiness probe timed out");
                false
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "Readiness probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};

    #[tokio::test]
    async fn test_any_status_counts_as_ready() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // GET on a POST-only route answers 405, which still proves the socket is bound.
            let app = Router::new().route("/mcp", post(|| async { "ok" }));
            axum::serve(listener, app).await.unwrap();
        });

        let probe = ReadinessProbe::new(format!("http://{}/mcp", addr), Duration::from_secs(1)).unwrap();
        assert!(probe.check().await);
    }

    #[tokio::test]
    async fn test_closed_port_is_not_ready() {
        let probe = ReadinessProbe::new("http://127.0.0.1:1/mcp", Duration::from_millis(200)).unwrap();
        assert!(!probe.check().await);
    }
}
