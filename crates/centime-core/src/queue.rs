// Persisted-order request queue.
//
// Requests wait here whenever the network is offline or a token refresh is
// in flight. Order is FIFO except for the request that triggered a refresh,
// which goes back to the front so it replays before anything queued behind
// it.

use std::collections::VecDeque;
use std::sync::Mutex;

use centime_api::{ApiResponse, Parameters};
use tokio::sync::oneshot;

use crate::error::CoreError;

/// Per-request dispatch options.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions {
    /// Attach the session token and fail fast when there is none.
    pub requires_auth: bool,
    /// Hand expired-token responses back to the caller instead of
    /// refreshing and replaying.
    pub do_not_retry: bool,
    /// Whether a pending-request cancellation may abort this call.
    pub can_cancel: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            requires_auth: true,
            do_not_retry: false,
            can_cancel: true,
        }
    }
}

impl RequestOptions {
    /// For commands that run before sign-in, like `Authenticate` itself.
    #[must_use]
    pub fn unauthenticated(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    #[must_use]
    pub fn without_retry(mut self) -> Self {
        self.do_not_retry = true;
        self
    }

    /// Sign-out and similar teardown calls must not be aborted mid-flight.
    #[must_use]
    pub fn non_cancellable(mut self) -> Self {
        self.can_cancel = false;
        self
    }
}

/// A command waiting for dispatch, carrying the channel that resolves the
/// caller's future.
pub(crate) struct QueuedRequest {
    pub command: String,
    pub parameters: Parameters,
    pub options: RequestOptions,
    /// Set when the request is replayed out of the queue rather than
    /// dispatched directly by a caller.
    pub from_queue: bool,
    /// The token this request was sent with, so the middleware can tell a
    /// stale failure from a fresh one.
    pub token_snapshot: Option<String>,
    tx: oneshot::Sender<Result<ApiResponse, CoreError>>,
}

impl QueuedRequest {
    pub fn new(
        command: String,
        parameters: Parameters,
        options: RequestOptions,
    ) -> (Self, oneshot::Receiver<Result<ApiResponse, CoreError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                command,
                parameters,
                options,
                from_queue: false,
                token_snapshot: None,
                tx,
            },
            rx,
        )
    }

    /// Resolve the caller's future. The caller may have gone away; a dead
    /// receiver is not an error.
    pub fn resolve(self, result: Result<ApiResponse, CoreError>) {
        let _ = self.tx.send(result);
    }
}

/// FIFO holding area for requests that cannot go out yet.
#[derive(Default)]
pub(crate) struct RequestQueue {
    inner: Mutex<VecDeque<QueuedRequest>>,
}

impl RequestQueue {
    pub fn push_back(&self, request: QueuedRequest) {
        self.inner
            .lock()
            .expect("request queue lock poisoned")
            .push_back(request);
    }

    pub fn push_front(&self, request: QueuedRequest) {
        self.inner
            .lock()
            .expect("request queue lock poisoned")
            .push_front(request);
    }

    /// Take every queued request, oldest first.
    pub fn drain(&self) -> Vec<QueuedRequest> {
        self.inner
            .lock()
            .expect("request queue lock poisoned")
            .drain(..)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .expect("request queue lock poisoned")
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(command: &str) -> QueuedRequest {
        QueuedRequest::new(command.into(), Parameters::new(), RequestOptions::default()).0
    }

    #[test]
    fn drains_in_fifo_order() {
        let queue = RequestQueue::default();
        queue.push_back(queued("First"));
        queue.push_back(queued("Second"));
        queue.push_front(queued("Urgent"));

        let drained: Vec<String> = queue.drain().into_iter().map(|r| r.command).collect();
        assert_eq!(drained, vec!["Urgent", "First", "Second"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn default_options_require_auth() {
        let options = RequestOptions::default();
        assert!(options.requires_auth);
        assert!(!options.do_not_retry);
        assert!(options.can_cancel);

        let options = RequestOptions::default().unauthenticated().without_retry();
        assert!(!options.requires_auth);
        assert!(options.do_not_retry);
    }
}
