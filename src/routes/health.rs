use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct Status {
    status: String,
}

pub async fn healthcheck() -> Json<Status> {
    Json(Status {
        status: "Available".to_string(),
    })
}
