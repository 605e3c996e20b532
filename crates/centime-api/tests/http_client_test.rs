#![allow(clippy::unwrap_used)]
// Integration tests for `HttpClient` using wiremock.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use centime_api::{ApiError, Credentials, HttpClient, Parameters, TransportConfig, authenticate};

async fn setup() -> (MockServer, HttpClient) {
    let server = MockServer::start().await;
    let api_root = Url::parse(&server.uri()).unwrap();
    let client = HttpClient::new(&TransportConfig::new(api_root)).unwrap();
    (server, client)
}

#[tokio::test]
async fn command_is_routed_via_query_param_with_form_body() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .and(query_param("command", "CreateChatReport"))
        .and(body_string_contains("emailList=a%40x.com"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"jsonCode": 200, "reportID": 7})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut parameters = Parameters::new();
    parameters.insert("emailList".into(), json!("a@x.com"));

    let response = client.request("CreateChatReport", &parameters).await.unwrap();
    assert!(response.is_success());
    assert_eq!(response.data.get("reportID"), Some(&json!(7)));
}

#[tokio::test]
async fn not_authenticated_code_passes_through_as_response() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonCode": 407})))
        .mount(&server)
        .await;

    // 407 is the middleware's concern, not a transport error.
    let response = client.request("Get", &Parameters::new()).await.unwrap();
    assert!(response.is_not_authenticated());
}

#[tokio::test]
async fn service_interruption_in_200_body_is_a_typed_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonCode": 666,
            "message": "scheduled maintenance",
        })))
        .mount(&server)
        .await;

    let err = client.request("Get", &Parameters::new()).await.unwrap_err();
    assert!(
        matches!(err, ApiError::ServiceInterrupted { ref message } if message == "scheduled maintenance"),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn internal_failure_in_200_body_is_a_typed_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonCode": 500})))
        .mount(&server)
        .await;

    let err = client.request("Get", &Parameters::new()).await.unwrap_err();
    assert!(matches!(err, ApiError::InternalFailure { .. }), "got: {err:?}");
}

#[tokio::test]
async fn non_2xx_status_is_an_http_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let err = client.request("Get", &Parameters::new()).await.unwrap_err();
    assert!(matches!(err, ApiError::Http { status: 502 }), "got: {err:?}");
}

#[tokio::test]
async fn invalid_body_is_a_deserialization_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client.request("Get", &Parameters::new()).await.unwrap_err();
    assert!(matches!(err, ApiError::Deserialization { .. }), "got: {err:?}");
}

#[tokio::test]
async fn multibyte_body_straddling_the_preview_cutoff_still_errors_cleanly() {
    let (server, client) = setup().await;

    // A multibyte character at byte offset 199 spans the old 200-byte
    // truncation point.
    let body = format!("{}é rest of a proxy error page", "a".repeat(199));
    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let err = client.request("Get", &Parameters::new()).await.unwrap_err();
    assert!(matches!(err, ApiError::Deserialization { .. }), "got: {err:?}");
}

#[tokio::test]
async fn cancel_aborts_in_flight_requests_and_spares_later_ones() {
    let (server, client) = setup().await;
    let client = Arc::new(client);

    Mock::given(method("POST"))
        .and(path("/api"))
        .and(query_param("command", "Slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonCode": 200}))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api"))
        .and(query_param("command", "Fast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonCode": 200})))
        .mount(&server)
        .await;

    let in_flight = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.request("Slow", &Parameters::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.cancel_pending_requests();

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(err.is_abort(), "got: {err:?}");

    // The rotated signal leaves new requests unaffected.
    let response = client.request("Fast", &Parameters::new()).await.unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn non_cancellable_requests_ignore_the_shared_signal() {
    let (server, client) = setup().await;
    let client = Arc::new(client);

    Mock::given(method("POST"))
        .and(path("/api"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonCode": 200}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let in_flight = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .request_with_options(
                    "DeleteLogin",
                    &Parameters::new(),
                    centime_api::Method::Post,
                    false,
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.cancel_pending_requests();

    // Still completes: sign-out must not cancel the logout request itself.
    let response = in_flight.await.unwrap().unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn authenticate_returns_tokens_on_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .and(query_param("command", "Authenticate"))
        .and(body_string_contains("partnerUserID=generated-login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonCode": 200,
            "authToken": "fresh-token",
            "encryptedAuthToken": "enc",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = Credentials::new("generated-login", "generated-secret");
    let tokens = authenticate(&client, &credentials).await.unwrap();
    assert_eq!(tokens.auth_token, "fresh-token");
    assert_eq!(tokens.encrypted_auth_token.as_deref(), Some("enc"));
}

#[tokio::test]
async fn authenticate_maps_decline_codes() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .and(query_param("command", "Authenticate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonCode": 401})))
        .mount(&server)
        .await;

    let credentials = Credentials::new("generated-login", "wrong");
    let err = authenticate(&client, &credentials).await.unwrap_err();
    assert!(
        matches!(err, ApiError::Authentication { ref message } if message == "incorrect login or password"),
        "got: {err:?}"
    );
}
