use centime_api::ApiError;
use centime_store::StoreError;
use thiserror::Error;

/// Top-level error type for the `centime-core` crate.
///
/// Callers of [`NetworkManager::request`](crate::NetworkManager::request)
/// receive either a resolved response or one of these; rendering is the
/// UI's responsibility.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Transport or backend failure surfaced from the API layer.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Persisted-store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An authenticated command was issued with no auth token present.
    /// The sign-in redirect has already been triggered.
    #[error("Not signed in -- command requires an auth token")]
    NotSignedIn,

    /// Silent reauthentication is impossible: no stored credentials.
    #[error("Missing credentials required for authentication")]
    MissingCredentials,

    /// Reauthentication was attempted and declined.
    #[error("Unable to reauthenticate: {message}")]
    UnableToReauthenticate { message: String },

    /// The network session was torn down while this request was pending.
    #[error("Network session has been shut down")]
    ShutDown,
}
