// The Authenticate wire command.
//
// Exchanges partner credentials for a fresh auth token. Used by the sign-in
// flow and by the reauthentication middleware; the network queue is paused
// while this runs, so the call itself must never be queued.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use crate::error::ApiError;
use crate::http::HttpClient;
use crate::wire::{Method, Parameters, codes};

/// Partner credentials for silent reauthentication.
///
/// The pair is auto-generated at first sign-in and persisted; it never
/// contains the user's real password.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Tokens returned by a successful `Authenticate`.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub auth_token: String,
    pub encrypted_auth_token: Option<String>,
}

/// Exchange `credentials` for fresh tokens.
///
/// Declines map to [`ApiError::Authentication`] with a stable reason
/// string; transport failures pass through so callers can distinguish
/// "wrong credentials" from "API unreachable".
pub async fn authenticate(
    client: &HttpClient,
    credentials: &Credentials,
) -> Result<AuthTokens, ApiError> {
    let mut parameters = Parameters::new();
    parameters.insert(
        "partnerUserID".into(),
        Value::String(credentials.login.clone()),
    );
    parameters.insert(
        "partnerUserSecret".into(),
        Value::String(credentials.password.expose_secret().to_owned()),
    );
    // An expired-token response to Authenticate itself must never trigger
    // another reauthentication.
    parameters.insert("shouldRetry".into(), Value::Bool(false));

    debug!("authenticating");
    let response = client
        .request_with_options("Authenticate", &parameters, Method::Post, true)
        .await?;

    if response.json_code != codes::SUCCESS {
        return Err(ApiError::Authentication {
            message: decline_reason(response.json_code, response.message.as_deref()),
        });
    }

    let auth_token = response.auth_token.ok_or_else(|| ApiError::Deserialization {
        message: "Authenticate response missing authToken".into(),
    })?;

    debug!("authentication successful");
    Ok(AuthTokens {
        auth_token,
        encrypted_auth_token: response.encrypted_auth_token,
    })
}

/// Map the documented Authenticate decline codes to stable reasons the UI
/// can localize on.
fn decline_reason(code: i64, message: Option<&str>) -> String {
    let reason = match code {
        401 => "incorrect login or password",
        // The WAF strips too-short secrets, which Auth reports as missing.
        402 if message == Some("402 Missing partnerUserSecret") => "incorrect login or password",
        402 => "two-factor authentication required",
        403 if message == Some("Invalid code") => "incorrect two-factor code",
        403 => "invalid login or password",
        404 => "unable to reset password",
        405 => "no access",
        413 => "account locked",
        _ => "authentication failed",
    };
    reason.to_owned()
}
