//! Network session, request queue, and response middleware.
//!
//! Ties the wire client (`centime-api`) and the persisted store
//! (`centime-store`) together: callers hand [`NetworkManager`] a command and
//! get back a future that resolves once the command has completed, been
//! replayed after a token refresh, or failed terminally. Offline periods and
//! expired tokens are handled internally; the caller never sees them.

mod error;
mod manager;
mod middleware;
mod queue;
mod redirect;
mod session;

pub use error::CoreError;
pub use manager::{NetworkConfig, NetworkManager};
pub use queue::RequestOptions;
pub use redirect::{LogOnlyRedirect, SignInRedirect};
pub use session::NetworkSession;

pub use centime_api::{ApiError, ApiResponse, Credentials, Parameters, TransportConfig};
pub use centime_store::{Store, StoreUpdate};
