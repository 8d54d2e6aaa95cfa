mod chatbot;
mod classify;
mod detect;
mod health;
mod metrics;

use crate::{error::PipelineError, server::SharedState};
use axum::{
    body::Bytes,
    extract::multipart::{Multipart, MultipartError, MultipartRejection},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chatbot::chatbot_response;
pub use classify::classify_image;
pub use detect::detect_objects;
pub use health::healthcheck;
pub use metrics::metrics_handler;

/// Multipart field that carries the uploaded image.
const IMAGE_FIELD: &str = "image";

pub fn api_routes(state: &SharedState) -> Router<SharedState> {
    let mut router = Router::new()
        .route("/", get(home))
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/api/classify/", post(classify_image));

    if state.detector.is_some() {
        router = router.route("/api/detect/", post(detect_objects));
    }
    if state.faqs.is_some() {
        router = router.route("/api/chatbot/", post(chatbot_response));
    }

    router
}

async fn home() -> Html<&'static str> {
    Html("<h1>YOLOv8 Image Classification API</h1>")
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Invalid upload: {0}")]
    Upload(#[from] MultipartError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Pipeline(err) if err.is_client_error() => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(err.to_string()))).into_response()
            }
            ApiError::Pipeline(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_details(
                    "Failed to process image",
                    err.to_string(),
                )),
            )
                .into_response(),
            ApiError::Upload(err) => {
                let status = err.status();
                (status, Json(ErrorResponse::new(format!("Invalid upload: {}", err.body_text()))))
                    .into_response()
            }
        }
    }
}

/// Pulls the `image` field out of a multipart upload. A request that is not
/// multipart at all is treated the same as one without the field.
async fn read_image_field(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Bytes, ApiError> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::warn!("Rejected upload: {}", rejection.body_text());
            return Err(PipelineError::MissingImage.into());
        }
    };

    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(IMAGE_FIELD) {
            return Ok(field.bytes().await?);
        }
    }

    Err(PipelineError::MissingImage.into())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_home_names_the_api() {
        let Html(page) = home().await;
        assert_eq!(page, "<h1>YOLOv8 Image Classification API</h1>");
    }
}
