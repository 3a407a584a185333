use super::*;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> RestClient {
    RestClient::parse(&server.uri())
        .expect("mock server uri should parse")
        .with_backoff(Duration::from_millis(5))
}

#[test]
fn base_url_gets_trailing_slash() {
    let client = RestClient::parse("https://api.openai.com/v1").expect("url should parse");
    assert_eq!(client.base_url().as_str(), "https://api.openai.com/v1/");
    assert_eq!(
        client
            .base_url()
            .join("embeddings")
            .expect("join should work")
            .as_str(),
        "https://api.openai.com/v1/embeddings"
    );
}

#[test]
fn invalid_base_url() {
    assert!(matches!(
        RestClient::parse("not a url"),
        Err(RestError::InvalidUrl(_))
    ));
}

#[test]
fn retry_attempts_never_zero() {
    let client = RestClient::parse("http://localhost:1")
        .expect("url should parse")
        .with_retry_attempts(0);
    assert_eq!(client.retry_attempts(), 1);
}

#[tokio::test]
async fn sends_headers_and_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(header("api-key", "secret"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({"query": "customers"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_header("api-key", "secret");
    let response = client
        .post_json("search", &json!({"query": "customers"}))
        .await
        .expect("request should succeed");

    assert!(response.is_success());
    let body: serde_json::Value = response.json().expect("body should be json");
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn client_errors_are_returned_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(4);
    let response = client
        .get("collections/missing")
        .await
        .expect("404 is a response, not an error");

    assert_eq!(response.status, 404);
    assert_eq!(response.body, "not found");
    assert!(!response.is_success());
}

#[tokio::test]
async fn server_errors_are_retried_up_to_budget() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/indexes/flaky"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .expect(4)
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(4);
    let response = client
        .delete("indexes/flaky")
        .await
        .expect("final 5xx is handed back");

    assert_eq!(response.status, 503);
}

#[tokio::test]
async fn single_attempt_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/collections/c"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .put_json("collections/c", &json!({}))
        .await
        .expect("final 5xx is handed back");
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn connection_failure_is_transport_error() {
    // Nothing listens on port 1
    let client = RestClient::parse("http://127.0.0.1:1")
        .expect("url should parse")
        .with_timeout(Duration::from_secs(2));

    let result = client.get("collections").await;
    assert!(matches!(result, Err(RestError::Transport { .. })));
}
