// Wire protocol types.
//
// Commands go out as `POST {api_root}api?command={Name}` with form-encoded
// parameters; every response is a JSON envelope carrying `jsonCode`.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Distinguished `jsonCode` values.
///
/// `200` is success. `407` means the auth token has expired and is never
/// surfaced to the original caller (the reauthentication middleware owns
/// it). `666` and `500` are soft failures the backend signals inside a 200
/// HTTP response; the transport raises them as typed errors. Any other code
/// is a command-specific failure forwarded verbatim.
pub mod codes {
    pub const SUCCESS: i64 = 200;
    pub const NOT_AUTHENTICATED: i64 = 407;
    pub const INTERNAL_FAILURE: i64 = 500;
    pub const SERVICE_INTERRUPTED: i64 = 666;
}

/// Parameters for one command invocation, form-encoded at dispatch.
pub type Parameters = Map<String, Value>;

/// HTTP method for a command. Almost everything is a POST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Post,
    Get,
}

/// The JSON response envelope.
///
/// Known fields are lifted out; everything else stays available in `data`
/// for command-specific handling.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    #[serde(rename = "jsonCode")]
    pub json_code: i64,

    #[serde(default)]
    pub message: Option<String>,

    /// Fresh token from `Authenticate`.
    #[serde(rename = "authToken", default)]
    pub auth_token: Option<String>,

    #[serde(rename = "encryptedAuthToken", default)]
    pub encrypted_auth_token: Option<String>,

    /// Store update instructions (set/merge batches) a command may attach;
    /// applied by the persistence middleware before the caller sees the
    /// response.
    #[serde(rename = "storeData", default)]
    pub store_data: Option<Value>,

    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.json_code == codes::SUCCESS
    }

    /// The token-expired signal intercepted by the reauth middleware.
    pub fn is_not_authenticated(&self) -> bool {
        self.json_code == codes::NOT_AUTHENTICATED
    }
}

/// Render parameters as form fields. Strings pass through as-is; anything
/// else is JSON-rendered (the backend parses nested payloads itself).
pub(crate) fn form_fields(parameters: &Parameters) -> Vec<(String, String)> {
    parameters
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_lifts_known_fields_and_keeps_the_rest() {
        let response: ApiResponse = serde_json::from_value(json!({
            "jsonCode": 200,
            "authToken": "abc",
            "reportID": 42,
        }))
        .unwrap();

        assert!(response.is_success());
        assert_eq!(response.auth_token.as_deref(), Some("abc"));
        assert_eq!(response.data.get("reportID"), Some(&json!(42)));
    }

    #[test]
    fn form_fields_render_scalars_without_quotes() {
        let mut parameters = Parameters::new();
        parameters.insert("authToken".into(), json!("tok"));
        parameters.insert("reportID".into(), json!(7));
        parameters.insert("shouldRetry".into(), json!(false));

        let fields = form_fields(&parameters);
        assert!(fields.contains(&("authToken".into(), "tok".into())));
        assert!(fields.contains(&("reportID".into(), "7".into())));
        assert!(fields.contains(&("shouldRetry".into(), "false".into())));
    }
}
