use super::ErrorResponse;
use crate::server::SharedState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

const ROUTE: &str = "/api/chatbot/";

#[derive(Deserialize, Debug)]
pub struct ChatRequest {
    message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatReply {
    pub reply: String,
}

#[instrument(skip(state, request))]
pub async fn chatbot_response(
    State(state): State<SharedState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Some(faqs) = state.faqs.clone() else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("Chatbot not configured")),
        )
            .into_response();
    };
    state.metrics.record_request(ROUTE);

    let message = match request {
        Ok(Json(ChatRequest {
            message: Some(message),
        })) => message,
        Ok(_) => return no_message(),
        Err(rejection) => {
            tracing::warn!("Rejected chatbot request: {}", rejection.body_text());
            return no_message();
        }
    };

    match faqs.answer(message.trim()) {
        Some(answer) => Json(ChatReply {
            reply: answer.to_string(),
        })
        .into_response(),
        None => {
            tracing::info!("No FAQ matches the message");
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::with_details("No matching answer", message)),
            )
                .into_response()
        }
    }
}

fn no_message() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::new("No message provided")),
    )
        .into_response()
}
