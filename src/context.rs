//! Cancellable, deadline-bound wait handle passed into [`Ratelimiter::wait_bucket`].
//!
//! A [`WaitContext`] bounds the two unbounded suspension points of the acquire path:
//! waiting for a bucket's lock and sleeping out a back-off. Either wait unwinds as soon as
//! the context's [`CancellationToken`] fires or its deadline passes.
//!
//! Dropping the future returned by `wait_bucket` is also a valid way to abandon a wait; the
//! context exists for callers that need to cancel from elsewhere or to reject back-offs
//! that cannot finish in time.
//!
//! [`Ratelimiter::wait_bucket`]: crate::Ratelimiter::wait_bucket

use crate::error::RatelimitError;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline plus cancellation signal for a single wait.
#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    deadline: Option<Instant>,
    token: CancellationToken,
}

impl WaitContext {
    /// A context with no deadline and a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now. A timeout too large to represent means no
    /// deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => Self::new().deadline_at(deadline),
            None => Self::new(),
        }
    }

    /// Set an absolute deadline.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Use an existing token, e.g. a child of a shutdown token.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// The configured deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token observed by this context.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Cancel every wait observing this context.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether waiting until `until` would outlive the deadline.
    pub(crate) fn outlived_by(&self, until: Instant) -> bool {
        self.deadline.is_some_and(|deadline| until > deadline)
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Cancellation wins if both are already true.
    pub(crate) async fn done(&self) -> RatelimitError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => RatelimitError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => {
                        RatelimitError::DeadlineExceeded { wait: Duration::ZERO }
                    }
                }
            }
            None => {
                self.token.cancelled().await;
                RatelimitError::Cancelled
            }
        }
    }
}
