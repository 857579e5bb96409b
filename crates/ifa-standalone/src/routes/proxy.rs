use axum::{
  body::Body,
  extract::{Request, State},
  http::StatusCode,
  response::{IntoResponse, Response},
};
use ifa_core::types::{RequestDescriptor, ResponseDescriptor, FORWARDED_HEADERS};

use crate::services::fetcher::Fetch;
use crate::state::AppState;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Every request outside the control surface is answered by the proxy.
pub async fn intercept<F: Fetch>(State(state): State<AppState<F>>, req: Request) -> Response {
  let (parts, body) = req.into_parts();
  let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
    Ok(b) => b,
    Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response(),
  };

  let headers = parts
    .headers
    .iter()
    .filter(|(name, _)| FORWARDED_HEADERS.contains(&name.as_str()))
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let descriptor = RequestDescriptor {
    method: parts.method.as_str().to_string(),
    url: parts
      .uri
      .path_and_query()
      .map(|pq| pq.as_str().to_string())
      .unwrap_or_else(|| "/".into()),
    headers,
    body,
  };

  into_response(state.proxy.handle(descriptor).await)
}

fn into_response(resp: ResponseDescriptor) -> Response {
  let mut builder = Response::builder().status(resp.status);
  for (name, value) in &resp.headers {
    builder = builder.header(name.as_str(), value.as_str());
  }
  builder
    .body(Body::from(resp.body))
    .unwrap_or_else(|e| {
      tracing::error!("Invalid proxied response: {}", e);
      StatusCode::BAD_GATEWAY.into_response()
    })
}
