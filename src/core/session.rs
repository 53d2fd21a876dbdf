//! Scan-session handle.
//!
//! Every timer, poll and background task in this crate is registered against a
//! [`Session`]. Ending the session cancels all of them; a timer that fires after
//! the end is a silent no-op.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("session {0} was torn down")]
pub struct SessionTornDown(pub Uuid);

#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    token: CancellationToken,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_ended(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Tear the session down. Idempotent.
    pub fn end(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("session {} ended", self.id);
        }
        self.token.cancel();
    }

    /// Resolves once the session has ended.
    pub async fn ended(&self) {
        self.token.cancelled().await
    }

    /// Sleep for `duration`, or fail early if the session ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), SessionTornDown> {
        self.sleep_until(tokio::time::Instant::now() + duration).await
    }

    pub async fn sleep_until(&self, deadline: tokio::time::Instant) -> Result<(), SessionTornDown> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(SessionTornDown(self.id)),
            _ = tokio::time::sleep_until(deadline) => {
                if self.token.is_cancelled() {
                    Err(SessionTornDown(self.id))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Spawn a task bound to this session's lifetime.
    pub fn spawn<F>(&self, fut: F) -> TimerHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        });
        TimerHandle(handle)
    }
}

/// Handle to a session-bound task. Cancelling is idempotent, including after the
/// task already finished.
#[derive(Debug)]
pub struct TimerHandle(JoinHandle<()>);

impl TimerHandle {
    pub fn cancel(&self) {
        self.0.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}
