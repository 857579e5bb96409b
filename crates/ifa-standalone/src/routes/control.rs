use axum::{extract::State, http::StatusCode, response::Json, routing::post, Router};
use ifa_core::control::{ControlMessage, ControlReply};
use ifa_core::error::AppError;
use serde_json::Value;

use super::error_response;
use crate::services::fetcher::Fetch;
use crate::state::AppState;

pub fn router<F: Fetch>() -> Router<AppState<F>> {
  Router::new().route("/control", post(control::<F>))
}

async fn control<F: Fetch>(
  State(state): State<AppState<F>>,
  Json(body): Json<Value>,
) -> Result<Json<ControlReply>, (StatusCode, Json<Value>)> {
  let (message, tag) =
    ControlMessage::parse(&body).map_err(|e| error_response(AppError::BadRequest(e)))?;
  let reply = state
    .control
    .ask(message, tag)
    .await
    .map_err(|e| error_response(AppError::Unavailable(e)))?;
  Ok(Json(reply))
}
