mod common;

use axum::http::{Method, StatusCode};
use common::{response_json, TestApp};

#[tokio::test]
async fn health_reports_database_up() {
    let app = TestApp::new().await;

    let (status, body) = app.call(Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "up");
    assert_eq!(body["details"]["database"]["status"], "up");

    let (status, body) = app.call(Method::GET, "/health/ready", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn api_status_is_wrapped_and_echoes_request_id() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/status", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .expect("request id header");

    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["meta"]["request_id"], request_id.as_str());
}

#[tokio::test]
async fn error_bodies_carry_the_request_id() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(Method::GET, "/api/v1/orders/my-orders", None, None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert!(body["requestId"].is_string());
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(Method::GET, "/api-docs/openapi.json", None, None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/orders"].is_object());
    assert!(body["paths"]["/api/v1/payments/verify/{session_id}"].is_object());
}
