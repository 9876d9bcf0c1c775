mod common;

use authd::handlers::auth::{
    CONFIRMED_MESSAGE, PASSWORD_UPDATED_MESSAGE, PWRESET_MESSAGE, SIGNUP_MESSAGE,
};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use common::TestApp;
use serde_json::{json, Value};
use tower::util::ServiceExt;

const EMAIL: &str = "bob@example.com";
const PASSWORD: &str = "hunter22";

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, uri, Some(body)).await
}

async fn sign_up(test: &TestApp, router: &Router) -> String {
    let (status, body) = post(
        router,
        "/v1/auth/signup",
        json!({ "email": EMAIL, "password": PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], SIGNUP_MESSAGE);
    test.last_confirmation_id(EMAIL)
}

#[tokio::test]
async fn health_reports_service() {
    let test = TestApp::new();
    let router = test.router();

    let (status, body) = call(&router, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "authd-test");
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let test = TestApp::new();

    let response = test
        .router()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "req-42");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    assert_eq!(response.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
}

#[tokio::test]
async fn openapi_document_lists_auth_routes() {
    let test = TestApp::new();
    let router = test.router();

    let (status, body) = call(&router, Method::GET, "/.well-known/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    let paths = body["paths"].as_object().unwrap();
    for path in [
        "/v1/auth/signup",
        "/v1/auth/signup/confirm/{id}",
        "/v1/auth/pwreset",
        "/v1/auth/pwreset/confirm/{id}",
        "/v1/auth/signin",
        "/v1/auth/refresh",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}

#[tokio::test]
async fn metrics_without_recorder_is_not_found() {
    let test = TestApp::new();
    let router = test.router();

    let (status, _) = call(&router, Method::GET, "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn sign_up_validation_errors_carry_field_details() {
    let test = TestApp::new();
    let router = test.router();

    let (status, body) = post(
        &router,
        "/v1/auth/signup",
        json!({ "email": "not-an-email", "password": "123" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation failed");
    assert_eq!(body["details"]["email"], json!(["email-invalid"]));
    assert_eq!(body["details"]["password"], json!(["password-short"]));
}

#[tokio::test]
async fn duplicate_sign_up_is_bad_request() {
    let test = TestApp::new();
    let router = test.router();
    sign_up(&test, &router).await;

    let (status, body) = post(
        &router,
        "/v1/auth/signup",
        json!({ "email": EMAIL, "password": PASSWORD }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["email"], json!(["email-uniq"]));
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let test = TestApp::new();
    let router = test.router();

    let (status, body) = post(&router, "/v1/auth/signup", json!({ "email": EMAIL })).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("password"));
}

#[tokio::test]
async fn sign_up_confirm_sign_in_and_refresh() {
    let test = TestApp::new();
    let router = test.router();
    let confirmation = sign_up(&test, &router).await;

    let (status, body) = post(
        &router,
        &format!("/v1/auth/signup/confirm/{confirmation}"),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], CONFIRMED_MESSAGE);

    let (status, tokens) = post(
        &router,
        "/v1/auth/signin",
        json!({ "email": EMAIL, "password": PASSWORD }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = tokens["access"].as_str().unwrap();
    assert!(test.auth.authenticate(access).is_ok());
    assert_eq!(
        tokens["expires"],
        (common::start_time() + Duration::minutes(60)).timestamp()
    );

    let refresh = tokens["refresh"].as_str().unwrap().to_string();
    let (status, renewed) = post(&router, "/v1/auth/refresh", json!({ "refresh": refresh })).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(renewed["refresh"], tokens["refresh"]);
    let account = test.store.account_by_email(EMAIL).await.unwrap();
    let claims = test
        .auth
        .authenticate(renewed["access"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.sub, account.id);
    assert_eq!(claims.email, EMAIL);
    assert_eq!(renewed["expires"], claims.exp);

    let (status, body) = post(&router, "/v1/auth/refresh", json!({ "refresh": refresh })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid credentials");
}

#[tokio::test]
async fn confirming_twice_is_not_found() {
    let test = TestApp::new();
    let router = test.router();
    let confirmation = sign_up(&test, &router).await;
    let uri = format!("/v1/auth/signup/confirm/{confirmation}");

    let (status, _) = call(&router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&router, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn expired_confirmation_is_request_timeout() {
    let test = TestApp::new();
    let router = test.router();
    let confirmation = sign_up(&test, &router).await;

    test.clock.advance(Duration::hours(121));

    let (status, _) = call(
        &router,
        Method::POST,
        &format!("/v1/auth/signup/confirm/{confirmation}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_ne!(test.last_confirmation_id(EMAIL), confirmation);
}

#[tokio::test]
async fn sign_in_failures_share_one_response() {
    let test = TestApp::new();
    let router = test.router();
    sign_up(&test, &router).await;

    let inactive = post(
        &router,
        "/v1/auth/signin",
        json!({ "email": EMAIL, "password": PASSWORD }),
    )
    .await;
    let unknown = post(
        &router,
        "/v1/auth/signin",
        json!({ "email": "nobody@example.com", "password": PASSWORD }),
    )
    .await;

    assert_eq!(inactive.0, StatusCode::UNAUTHORIZED);
    assert_eq!(inactive, unknown);
}

#[tokio::test]
async fn password_reset_over_http() {
    let test = TestApp::new();
    test.active_account(EMAIL, PASSWORD).await;
    let router = test.router();

    let (status, body) = post(&router, "/v1/auth/pwreset", json!({ "email": EMAIL })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], PWRESET_MESSAGE);
    let id = test.last_confirmation_id(EMAIL);

    let (status, body) = post(
        &router,
        &format!("/v1/auth/pwreset/confirm/{id}"),
        json!({ "password": "abc" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["details"]["password"], json!(["password-short"]));

    let (status, body) = post(
        &router,
        &format!("/v1/auth/pwreset/confirm/{id}"),
        json!({ "password": "a much better password" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], PASSWORD_UPDATED_MESSAGE);

    let (status, _) = post(
        &router,
        "/v1/auth/signin",
        json!({ "email": EMAIL, "password": "a much better password" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn password_reset_for_unknown_email_still_succeeds() {
    let test = TestApp::new();
    let router = test.router();

    let (status, body) = post(
        &router,
        "/v1/auth/pwreset",
        json!({ "email": "ghost@example.com" }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], PWRESET_MESSAGE);
    assert!(test.mailer.sent().is_empty());
}
