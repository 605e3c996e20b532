// Shared transport configuration for building the reqwest::Client.
//
// The HTTP client and the auth flow share timeout and user-agent settings
// through this struct, avoiding duplicated builder logic.

use std::time::Duration;

use url::Url;

use crate::error::ApiError;

/// Configuration for the shared HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// API root the `command=` endpoint hangs off of, e.g.
    /// `https://api.centime.app/`.
    pub api_root: Url,
    pub timeout: Duration,
    pub user_agent: String,
}

impl TransportConfig {
    pub fn new(api_root: Url) -> Self {
        Self {
            api_root,
            timeout: Duration::from_secs(30),
            user_agent: format!("centime-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, ApiError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(ApiError::Transport)
    }
}
