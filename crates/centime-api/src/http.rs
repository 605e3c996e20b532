// The HTTP transport.
//
// Turns a command name + parameters into an HTTP request against the
// configured API root, parses the JSON envelope, and maps transport-level
// failures and soft backend failures into typed errors. All cancellable
// in-flight requests share one cancellation token so they can be aborted
// together (e.g. on sign-out).

use std::sync::RwLock;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::error::ApiError;
use crate::transport::TransportConfig;
use crate::wire::{ApiResponse, Method, Parameters, codes, form_fields};

/// HTTP client for the command wire protocol.
pub struct HttpClient {
    http: reqwest::Client,
    api_root: Url,
    /// Shared cancellation signal for all cancellable in-flight requests.
    /// Rotated by `cancel_pending_requests()` so later requests are
    /// unaffected.
    cancel: RwLock<CancellationToken>,
}

impl HttpClient {
    pub fn new(config: &TransportConfig) -> Result<Self, ApiError> {
        Ok(Self {
            http: config.build_client()?,
            api_root: config.api_root.clone(),
            cancel: RwLock::new(CancellationToken::new()),
        })
    }

    /// Issue `command` with the default options (POST, cancellable).
    pub async fn request(
        &self,
        command: &str,
        parameters: &Parameters,
    ) -> Result<ApiResponse, ApiError> {
        self.request_with_options(command, parameters, Method::Post, true)
            .await
    }

    /// Issue `command`, choosing the HTTP method and whether the request
    /// participates in the shared cancellation signal.
    pub async fn request_with_options(
        &self,
        command: &str,
        parameters: &Parameters,
        method: Method,
        can_cancel: bool,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.command_url(command)?;
        debug!(command, "dispatching API command");

        let fields = form_fields(parameters);
        let send = match method {
            Method::Post => self.http.post(url).form(&fields).send(),
            Method::Get => self.http.get(url).query(&fields).send(),
        };

        let response = if can_cancel {
            // Snapshot the token at dispatch: a rotation after this point
            // must not cancel us twice nor spare us.
            let token = self.cancel_token();
            tokio::select! {
                () = token.cancelled() => return Err(ApiError::Aborted),
                result = send => result.map_err(ApiError::Transport)?,
            }
        } else {
            send.await.map_err(ApiError::Transport)?
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(ApiError::Transport)?;
        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|err| {
            // Truncate by chars, not bytes: the body is arbitrary text and a
            // byte index may fall inside a multibyte character.
            let preview: String = body.chars().take(200).collect();
            ApiError::Deserialization {
                message: format!("{err} (body preview: {preview:?})"),
            }
        })?;

        // The backend signals some failures inside a 200 response.
        match parsed.json_code {
            codes::SERVICE_INTERRUPTED => Err(ApiError::ServiceInterrupted {
                message: failure_message(&parsed),
            }),
            codes::INTERNAL_FAILURE => Err(ApiError::InternalFailure {
                message: failure_message(&parsed),
            }),
            code => {
                trace!(command, code, "API command completed");
                Ok(parsed)
            }
        }
    }

    /// Abort every cancellable in-flight request and rotate to a fresh
    /// signal so subsequent requests proceed normally.
    pub fn cancel_pending_requests(&self) {
        let mut guard = self.cancel.write().expect("cancel token lock poisoned");
        guard.cancel();
        *guard = CancellationToken::new();
    }

    fn cancel_token(&self) -> CancellationToken {
        self.cancel
            .read()
            .expect("cancel token lock poisoned")
            .clone()
    }

    fn command_url(&self, command: &str) -> Result<Url, ApiError> {
        let mut url = self.api_root.join("api").map_err(ApiError::InvalidUrl)?;
        url.query_pairs_mut().append_pair("command", command);
        Ok(url)
    }
}

fn failure_message(response: &ApiResponse) -> String {
    response
        .message
        .clone()
        .unwrap_or_else(|| format!("jsonCode={}", response.json_code))
}
