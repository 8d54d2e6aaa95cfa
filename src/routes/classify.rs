use super::{read_image_field, ApiError};
use crate::{postprocess::ClassificationResult, server::SharedState};
use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        State,
    },
    Json,
};
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/api/classify/";

#[instrument(skip(state, multipart))]
pub async fn classify_image(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassificationResult>, ApiError> {
    state.metrics.record_request(ROUTE);

    let image_data = match read_image_field(multipart).await {
        Ok(image_data) => image_data,
        Err(err) => {
            tracing::warn!("Rejected classification request: {}", err);
            state.metrics.record_prediction(ROUTE, "rejected");
            return Err(err);
        }
    };

    let start = Instant::now();
    let result = state.classifier.classify_async(image_data).await;
    state
        .metrics
        .record_inference_duration(start.elapsed().as_millis() as u64, ROUTE);

    match result {
        Ok(prediction) => {
            tracing::info!(
                category = %prediction.category,
                confidence = prediction.confidence,
                "Image classified"
            );
            state.metrics.record_prediction(ROUTE, "ok");
            Ok(Json(prediction))
        }
        Err(err) => {
            tracing::error!(stage = err.stage().as_str(), "Classification failed: {}", err);
            state.metrics.record_prediction(ROUTE, "error");
            Err(err.into())
        }
    }
}
