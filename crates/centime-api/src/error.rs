use thiserror::Error;

/// Top-level error type for the `centime-api` crate.
///
/// Covers transport failures, cancellation, and the backend's soft failures
/// (sentinel codes inside an otherwise-200 JSON body). `centime-core` decides
/// retry policy on top of these via the classifier helpers.
#[derive(Debug, Error)]
pub enum ApiError {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL construction error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Non-2xx HTTP status from the API host.
    #[error("HTTP failure (status {status})")]
    Http { status: u16 },

    /// The request was cancelled via `cancel_pending_requests()`.
    /// A benign terminal state, never retried.
    #[error("Request aborted")]
    Aborted,

    // ── Soft backend failures (200 HTTP status, sentinel jsonCode) ──
    /// The backend reported a service interruption.
    #[error("Backend service interrupted: {message}")]
    ServiceInterrupted { message: String },

    /// The backend reported an internal failure.
    #[error("Backend internal failure: {message}")]
    InternalFailure { message: String },

    // ── Authentication ──────────────────────────────────────────────
    /// The `Authenticate` command was declined.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// The response body was not a valid API envelope.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String },
}

impl ApiError {
    /// Returns `true` if this is a transient transport-level failure worth
    /// requeueing the request for.
    pub fn is_transient(&self) -> bool {
        if let Self::Transport(err) = self {
            err.is_timeout() || err.is_connect() || err.is_request()
        } else {
            false
        }
    }

    /// Returns `true` for the benign cancellation terminal state.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}
