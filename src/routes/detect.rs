use super::{read_image_field, ApiError, ErrorResponse};
use crate::{postprocess::Detection, server::SharedState};
use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Instant;
use tracing::instrument;

const ROUTE: &str = "/api/detect/";

#[derive(Serialize, Debug)]
pub struct DetectionResponse {
    pub detections: Vec<Detection>,
}

#[instrument(skip(state, multipart))]
pub async fn detect_objects(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let Some(detector) = state.detector.clone() else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Detection model not configured")),
        )
            .into_response();
    };
    state.metrics.record_request(ROUTE);

    let image_data = match read_image_field(multipart).await {
        Ok(image_data) => image_data,
        Err(err) => {
            tracing::warn!("Rejected detection request: {}", err);
            state.metrics.record_prediction(ROUTE, "rejected");
            return err.into_response();
        }
    };

    let start = Instant::now();
    let result = detector.detect_async(image_data).await;
    state
        .metrics
        .record_inference_duration(start.elapsed().as_millis() as u64, ROUTE);

    match result {
        Ok(detections) => {
            tracing::info!(detections = detections.len(), "Objects detected");
            state.metrics.record_prediction(ROUTE, "ok");
            Json(DetectionResponse { detections }).into_response()
        }
        Err(err) => {
            tracing::error!(stage = err.stage().as_str(), "Detection failed: {}", err);
            state.metrics.record_prediction(ROUTE, "error");
            ApiError::from(err).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::{mock::signature, InferenceEngine, ModelSignature},
        error::InferenceError,
        labels::LabelTable,
        preprocess::{PreprocessPolicy, Preprocessor},
        routes::test_support::{fixed_engine, json_body, multipart_with, png_bytes, state_with},
        service::DetectionService,
    };
    use ndarray::{Array, ArrayD, Ix4};
    use std::sync::Arc;

    /// One anchor boxing the centre quarter of a 64x64 input as class 1.
    struct SingleBox {
        signature: ModelSignature,
    }

    impl InferenceEngine for SingleBox {
        fn signature(&self) -> &ModelSignature {
            &self.signature
        }

        fn run(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, InferenceError> {
            self.signature.check_input(input.shape())?;
            let values = vec![32.0, 32.0, 32.0, 32.0, 0.1, 0.9];
            ArrayD::from_shape_vec(vec![1, 6, 1], values)
                .map_err(|e| InferenceError::Runtime(e.to_string()))
        }
    }

    fn detector() -> DetectionService {
        let mut signature = signature(64, 6);
        signature.output_shape = vec![1, 6, 1];
        DetectionService::new(
            Arc::new(SingleBox { signature }),
            Preprocessor::new(64, 64, PreprocessPolicy::UnitScale).unwrap(),
            LabelTable::new("coco-mini", vec!["person".into(), "bicycle".into()]).unwrap(),
            0.5,
            0.7,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_detect_returns_boxes_in_image_coordinates() {
        let mut state = state_with(fixed_engine());
        state.detector = Some(detector());
        let multipart = multipart_with("image", &png_bytes()).await;

        let response = detect_objects(State(state), Ok(multipart)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let detections = body["detections"].as_array().unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0]["label"], "bicycle");
        assert_eq!(detections[0]["class_id"], 1);
        // png_bytes() is 50x40, the box spans the middle half of the input.
        assert_eq!(detections[0]["x1"].as_f64().unwrap(), 12.5);
        assert_eq!(detections[0]["y2"].as_f64().unwrap(), 30.0);
    }

    #[tokio::test]
    async fn test_detect_without_image_is_bad_request() {
        let mut state = state_with(fixed_engine());
        state.detector = Some(detector());
        let multipart = multipart_with("file", &png_bytes()).await;

        let response = detect_objects(State(state), Ok(multipart)).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No image provided");
    }

    #[tokio::test]
    async fn test_detect_without_model_is_not_found() {
        let state = state_with(fixed_engine());
        let multipart = multipart_with("image", &png_bytes()).await;

        let response = detect_objects(State(state), Ok(multipart)).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
