use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::auth::API_KEY_HEADER;
use crate::error::GatewayError;
use crate::gateway::InferenceGateway;
use crate::health::HealthStatus;

pub const GENERATE_PATH: &str = "/generate";
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Default, Deserialize)]
pub struct GenerateParams {
    pub prompt: Option<String>,
}

/// The full route table.
pub fn router(gateway: Arc<InferenceGateway>) -> Router {
    Router::new()
        .route(GENERATE_PATH, get(generate_handler).post(generate_handler))
        .route(HEALTH_PATH, get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn generate_handler(
    State(gateway): State<Arc<InferenceGateway>>,
    Query(params): Query<GenerateParams>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let credential = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    let result = gateway
        .generate(params.prompt.as_deref(), credential)
        .await?;

    Ok(([(header::CONTENT_TYPE, result.media_type)], result.bytes).into_response())
}

async fn health_handler(State(gateway): State<Arc<InferenceGateway>>) -> Json<HealthStatus> {
    Json(gateway.health())
}
