//! Polling primitive: wait until a probe over the live page is satisfied.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    /// `None` polls until the session ends.
    pub max_attempts: Option<u32>,
}

impl PollOptions {
    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }
}

/// Result of one probe evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    Ready(T),
    /// Not there yet, but this is the best value seen so far.
    Partial(T),
    Pending,
}

impl<T> From<Option<T>> for Probe<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Probe::Ready(v),
            None => Probe::Pending,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{label}: condition not met after {attempts} attempts ({elapsed:?})")]
pub struct PollTimeout {
    pub label: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Found { value: T, attempts: u32 },
    /// Bounded wait ran out. Not an error: callers continue with `partial`.
    Exhausted {
        timeout: PollTimeout,
        partial: Option<T>,
    },
    Cancelled,
}

impl<T> PollOutcome<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, PollOutcome::Found { .. })
    }

    /// The found value, else the best partial value.
    pub fn value(self) -> Option<T> {
        match self {
            PollOutcome::Found { value, .. } => Some(value),
            PollOutcome::Exhausted { partial, .. } => partial,
            PollOutcome::Cancelled => None,
        }
    }
}

/// Polls a probe at a fixed interval on behalf of one session.
///
/// The first evaluation happens immediately. The next one is scheduled only
/// after the previous evaluation completed, so polls never overlap. Ending the
/// session stops the wait at the next suspension point.
#[derive(Debug, Clone)]
pub struct ContainerWaiter {
    session: Session,
}

impl ContainerWaiter {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn wait_for<T, F, Fut>(&self, label: &str, opts: PollOptions, mut probe: F) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Probe<T>>,
    {
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut partial = None;

        loop {
            if self.session.is_ended() {
                debug!("{}: wait abandoned, session ended", label);
                return PollOutcome::Cancelled;
            }

            attempts += 1;
            match probe().await {
                Probe::Ready(value) => {
                    debug!("{}: ready after {} attempt(s)", label, attempts);
                    return PollOutcome::Found { value, attempts };
                }
                Probe::Partial(value) => partial = Some(value),
                Probe::Pending => {}
            }

            if let Some(max) = opts.max_attempts {
                if attempts >= max {
                    let timeout = PollTimeout {
                        label: label.to_string(),
                        attempts,
                        elapsed: start.elapsed(),
                    };
                    warn!("{} (continuing with partial data: {})", timeout, partial.is_some());
                    return PollOutcome::Exhausted { timeout, partial };
                }
            }

            if self.session.sleep(opts.interval).await.is_err() {
                debug!("{}: wait abandoned, session ended", label);
                return PollOutcome::Cancelled;
            }
        }
    }
}
