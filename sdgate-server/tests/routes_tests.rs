mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use common::*;
use http_body_util::BodyExt;
use sdgate_server::{router, InferenceGateway};
use tower::util::ServiceExt; // for `oneshot`

const FOX_URI: &str = "/generate?prompt=a%20red%20fox%20in%20snow";

async fn send(
    gateway: InferenceGateway,
    method: Method,
    uri: &str,
    api_key: Option<&str>,
) -> Response {
    let app = router(Arc::new(gateway));
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        request = request.header("X-API-Key", key);
    }
    app.oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn generate_with_correct_key_returns_jpeg() {
    let model = Arc::new(StubModel::default());
    let response = send(
        authenticated_gateway(model.clone()),
        Method::GET,
        FOX_URI,
        Some(SECRET),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    let bytes = body_bytes(response).await;
    assert!(!bytes.is_empty());
    decode_jpeg(&bytes);
    assert_eq!(model.last_request().unwrap().prompt, PROMPT);
}

#[tokio::test]
async fn generate_accepts_post() {
    let response = send(
        authenticated_gateway(Arc::new(StubModel::default())),
        Method::POST,
        FOX_URI,
        Some(SECRET),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
}

#[tokio::test]
async fn generate_with_wrong_key_is_unauthorized() {
    let model = Arc::new(StubModel::default());
    let response = send(
        authenticated_gateway(model.clone()),
        Method::GET,
        FOX_URI,
        Some("wrong"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert_eq!(body, "Unauthorized");
    assert!(!body.contains(SECRET));
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn generate_without_key_is_unauthorized() {
    let model = Arc::new(StubModel::default());
    let response = send(authenticated_gateway(model.clone()), Method::GET, FOX_URI, None).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn empty_or_missing_prompt_is_a_client_error() {
    for uri in ["/generate?prompt=", "/generate?prompt=%20%20", "/generate"] {
        for key in [Some(SECRET), Some("wrong"), None] {
            let response = send(
                authenticated_gateway(Arc::new(StubModel::default())),
                Method::GET,
                uri,
                key,
            )
            .await;
            assert!(
                response.status().is_client_error(),
                "{uri} with {key:?} gave {}",
                response.status()
            );
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }
}

#[tokio::test]
async fn open_mode_serves_without_key() {
    let response = send(
        open_gateway(Arc::new(StubModel::default())),
        Method::GET,
        FOX_URI,
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn inference_failure_is_500_without_internal_detail() {
    let response = send(
        authenticated_gateway(Arc::new(FailingModel)),
        Method::GET,
        FOX_URI,
        Some(SECRET),
    )
    .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(!body.contains("CUDA"));
}

#[tokio::test]
async fn inference_timeout_is_504() {
    let response = send(
        gateway_with_timeout(
            Arc::new(SlowModel(Duration::from_millis(500))),
            Duration::from_millis(50),
        ),
        Method::GET,
        FOX_URI,
        Some(SECRET),
    )
    .await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn health_is_open_in_authenticated_mode() {
    for key in [None, Some(SECRET), Some("wrong")] {
        let before = Utc::now();
        let response = send(
            authenticated_gateway(Arc::new(StubModel::default())),
            Method::GET,
            "/health",
            key,
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(json["status"], "healthy");
        let timestamp: DateTime<Utc> = json["timestamp"].as_str().unwrap().parse().unwrap();
        let skew = (timestamp - before).num_milliseconds();
        assert!((0..5_000).contains(&skew), "timestamp skew {skew}ms");
    }
}

#[tokio::test]
async fn unknown_routes_are_404() {
    let response = send(
        open_gateway(Arc::new(StubModel::default())),
        Method::GET,
        "/v1/images/generations",
        None,
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
