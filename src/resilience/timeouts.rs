//! Deadline and cancellation for calls into the backend.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a bounded call did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    TimedOut(Duration),
    Cancelled,
}

/// Run `fut` until it completes, `deadline` elapses, or `cancel` fires.
///
/// Cancellation wins ties so a closed session never observes a late result.
pub async fn with_deadline<F>(
    fut: F,
    deadline: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    let bounded = async {
        match deadline {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| Interrupted::TimedOut(limit)),
            None => Ok(fut.await),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        out = bounded => out,
    }
}
