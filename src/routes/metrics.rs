use crate::server::SharedState;
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
};
use prometheus::{Encoder, TextEncoder, TEXT_FORMAT};

pub async fn metrics_handler(State(state): State<SharedState>) -> Response {
    let metric_families = state.metrics.registry.gather();
    let mut buffer = Vec::new();

    if let Err(err) = TextEncoder::new().encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", err);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    ([(CONTENT_TYPE, TEXT_FORMAT)], buffer).into_response()
}
