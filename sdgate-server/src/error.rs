use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

/// Terminal per-request failures of the gateway. Nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("inference failed: {0:#}")]
    InferenceFailure(#[source] anyhow::Error),

    #[error("inference timed out after {0:?}")]
    InferenceTimeout(Duration),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidArgument(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::InferenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::InferenceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            GatewayError::Unauthorized => "Unauthorized".to_string(),
            GatewayError::InvalidArgument(_) => self.to_string(),
            // Internal causes stay in the logs.
            GatewayError::InferenceFailure(_) => {
                error!(error = %self, "generate failed");
                "Image generation failed".to_string()
            }
            GatewayError::InferenceTimeout(_) => {
                error!(error = %self, "generate timed out");
                "Image generation timed out".to_string()
            }
        };
        (status, body).into_response()
    }
}
