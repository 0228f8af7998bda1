//! Per-query execution context
//!
//! Spawned tasks do not inherit the caller's span or cancellation state, so
//! both travel explicitly in a [`QueryContext`] and every task spawned on
//! behalf of a query receives a [`QueryContext::child`].

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Span;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct QueryContext {
    request_id: Uuid,
    cancel: CancellationToken,
    span: Span,
    deadline: Option<Instant>,
}

impl QueryContext {
    /// Context bound to the current span, without a deadline
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
            span: Span::current(),
            deadline: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Attach a caller-side cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Context for a spawned unit of work: same request id, span and
    /// deadline, and a token cancelled whenever this one is.
    pub fn child(&self) -> Self {
        Self {
            request_id: self.request_id,
            cancel: self.cancel.child_token(),
            span: self.span.clone(),
            deadline: self.deadline,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves when the token is cancelled or the deadline passes
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::new()
    }
}
