//! HTTP transport and wire protocol for the Centime API.
//!
//! Commands are invoked as `POST {api_root}api?command={Name}` with
//! form-encoded parameters; responses are JSON envelopes carrying a
//! `jsonCode`. This crate owns:
//!
//! - **[`HttpClient`]** — dispatch, envelope parsing, soft-failure mapping
//!   (the backend signals some failures inside a 200 response), and the
//!   shared rotating cancellation signal behind
//!   [`cancel_pending_requests`](HttpClient::cancel_pending_requests).
//! - **[`ApiError`]** — the failure taxonomy the retry policy in
//!   `centime-core` is written against.
//! - **[`authenticate`]** — the `Authenticate` command used for sign-in and
//!   silent token refresh.
//!
//! Queueing, retry, and reauthentication live one layer up in
//! `centime-core`; this crate performs exactly one attempt per call.

mod auth;
mod error;
mod http;
mod transport;
pub mod wire;

pub use auth::{AuthTokens, Credentials, authenticate};
pub use error::ApiError;
pub use http::HttpClient;
pub use transport::TransportConfig;
pub use wire::{ApiResponse, Method, Parameters, codes};
