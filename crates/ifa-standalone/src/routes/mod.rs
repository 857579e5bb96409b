pub mod control;
pub mod offline;
pub mod proxy;

use axum::http::StatusCode;
use axum::{Json, Router};
use ifa_core::config::CONTROL_PREFIX;
use ifa_core::error::AppError;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::fetcher::Fetch;
use crate::state::AppState;

/// The control surface under `/__offline`; every other path goes through the proxy.
pub fn app<F: Fetch>(state: AppState<F>) -> Router {
  Router::new()
    .nest(CONTROL_PREFIX, offline::router::<F>().merge(control::router::<F>()))
    .fallback(proxy::intercept::<F>)
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(state)
}

pub(crate) fn error_response(e: impl Into<AppError>) -> (StatusCode, Json<Value>) {
  let e = e.into();
  if let AppError::Internal(inner) = &e {
    tracing::error!("Internal error: {}", inner);
  }
  let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
  (status, Json(serde_json::json!({"error": e.to_string()})))
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::services::fetcher::testing::FakeFetcher;
  use axum::body::Body;
  use axum::http::Request;
  use ifa_core::config::Config;

  pub(crate) async fn test_state(dir: &tempfile::TempDir, fetcher: FakeFetcher) -> AppState<FakeFetcher> {
    let config = Config {
      data_dir: dir.path().display().to_string(),
      ..Config::default()
    };
    AppState::new(config, fetcher).await
  }

  pub(crate) async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  pub(crate) fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
      Some(json) => builder
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap(),
      None => builder.body(Body::empty()).unwrap(),
    }
  }

  #[test]
  fn test_error_response_status() {
    let (status, Json(body)) = error_response(AppError::Conflict("odu-database is already downloading".into()));
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "odu-database is already downloading");
  }
}
