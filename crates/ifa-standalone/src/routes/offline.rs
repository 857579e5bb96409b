use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{
    sse::{Event, KeepAlive, Sse},
    Json,
  },
  routing::{delete, get, post},
  Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use ifa_core::bundle::BundleKind;
use ifa_core::error::BundleError;
use ifa_core::storage::CacheStorage;
use ifa_core::types::DownloadTask;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::sync::broadcast::error::RecvError;

use super::error_response;
use crate::services::fetcher::Fetch;
use crate::state::AppState;

pub fn router<F: Fetch>() -> Router<AppState<F>> {
  Router::new()
    .route("/status", get(status::<F>))
    .route("/downloads", get(list_downloads::<F>))
    .route("/downloads/essential", post(download_essential::<F>))
    .route("/downloads/progress", get(progress_stream::<F>))
    .route("/downloads/{bundle}", post(start_download::<F>))
    .route("/data", delete(clear_data::<F>))
}

async fn status<F: Fetch>(
  State(state): State<AppState<F>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
  let lifecycle = state.proxy.state().await;
  let storage = state
    .proxy
    .cache()
    .report_usage()
    .await
    .map_err(error_response)?;

  // Cached responses keep working when the object store does not.
  let availability = match state.downloads.availability().await {
    Ok(a) => Some(a),
    Err(e) => {
      tracing::warn!("Availability unknown: {}", e);
      None
    }
  };

  Ok(Json(json!({
    "state": lifecycle,
    "availability": availability,
    "storage": storage,
  })))
}

async fn list_downloads<F: Fetch>(State(state): State<AppState<F>>) -> Json<Vec<DownloadTask>> {
  Json(state.downloads.tasks().await)
}

async fn download_essential<F: Fetch>(State(state): State<AppState<F>>) -> (StatusCode, Json<Value>) {
  let downloads = state.downloads.clone();
  tokio::spawn(async move {
    downloads.download_all_essential().await;
  });
  (StatusCode::ACCEPTED, Json(json!({"started": true})))
}

async fn start_download<F: Fetch>(
  State(state): State<AppState<F>>,
  Path(bundle): Path<String>,
) -> Result<(StatusCode, Json<DownloadTask>), (StatusCode, Json<Value>)> {
  let kind: BundleKind = bundle
    .parse()
    .map_err(|b| error_response(BundleError::UnknownBundle(b)))?;
  let task = state.downloads.spawn(kind).await.map_err(error_response)?;
  Ok((StatusCode::ACCEPTED, Json(task)))
}

fn task_event(task: &DownloadTask) -> Result<Event, Infallible> {
  Ok(
    Event::default()
      .event("progress")
      .data(serde_json::to_string(task).unwrap_or_default()),
  )
}

/// Current tasks first, then every update as it is published.
async fn progress_stream<F: Fetch>(
  State(state): State<AppState<F>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
  let rx = state.downloads.subscribe();
  let initial = state.downloads.tasks().await;

  let updates = stream::unfold(rx, |mut rx| async move {
    loop {
      match rx.recv().await {
        Ok(task) => return Some((task_event(&task), rx)),
        Err(RecvError::Lagged(skipped)) => {
          tracing::debug!("Progress subscriber lagged, {} updates skipped", skipped);
        }
        Err(RecvError::Closed) => return None,
      }
    }
  });

  let initial = stream::iter(initial.iter().map(task_event).collect::<Vec<_>>());
  Sse::new(initial.chain(updates)).keep_alive(KeepAlive::default())
}

async fn clear_data<F: Fetch>(
  State(state): State<AppState<F>>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
  state
    .downloads
    .clear_offline_data()
    .await
    .map_err(error_response)?;
  Ok(Json(json!({"success": true})))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::routes::app;
  use crate::routes::tests::{body_json, request, test_state};
  use crate::services::fetcher::testing::FakeFetcher;
  use ifa_core::types::TaskStatus;
  use tower::ServiceExt;

  #[tokio::test]
  async fn test_status_reports_lifecycle_and_storage() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir, FakeFetcher::new()).await;
    let resp = app(state)
      .oneshot(request("GET", "/__offline/status", None))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["state"], "installing");
    assert_eq!(body["availability"]["odus"], false);
    assert!(body["storage"]["usage"].is_u64());
    assert!(body["storage"]["quota"].is_null());
  }

  #[tokio::test]
  async fn test_unknown_bundle_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir, FakeFetcher::new()).await;
    let resp = app(state)
      .oneshot(request("POST", "/__offline/downloads/tarot", None))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn test_start_download_returns_accepted_task() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir, FakeFetcher::new()).await;
    let resp = app(state)
      .oneshot(request("POST", "/__offline/downloads/learning", None))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body = body_json(resp).await;
    assert_eq!(body["resourceId"], "learning");
    assert_eq!(body["status"], "downloading");
  }

  #[tokio::test]
  async fn test_list_downloads_after_run() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::new().respond(
      "/api/offline/learning-content",
      200,
      "application/json",
      r#"{"modules": [{"id": "intro"}]}"#,
    );
    let state = test_state(&dir, fetcher).await;
    let done = state.downloads.download(BundleKind::Learning).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);

    let resp = app(state)
      .oneshot(request("GET", "/__offline/downloads", None))
      .await
      .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body[0]["resourceId"], "learning");
    assert_eq!(body[0]["status"], "completed");
    assert_eq!(body[0]["progress"], 1.0);
  }

  #[tokio::test]
  async fn test_clear_data_removes_availability() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::new().respond(
      "/api/offline/odu-database",
      200,
      "application/json",
      r#"{"data": [{"id": "ogbe-meji"}]}"#,
    );
    let state = test_state(&dir, fetcher).await;
    state.downloads.download(BundleKind::OduDatabase).await.unwrap();
    assert!(state.downloads.availability().await.unwrap().odus);

    let resp = app(state.clone())
      .oneshot(request("DELETE", "/__offline/data", None))
      .await
      .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(!state.downloads.availability().await.unwrap().any());
  }
}
