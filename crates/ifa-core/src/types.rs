use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Headers carried between client, proxy and upstream. Everything else is dropped.
pub const FORWARDED_HEADERS: [&str; 5] = [
  "accept",
  "accept-language",
  "content-type",
  "cache-control",
  "if-none-match",
];

/// An intercepted request with the fixed set of fields the proxy looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
  pub method: String,
  /// Path and query, always starting with `/`.
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl RequestDescriptor {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: "GET".into(),
      url: url.into(),
      headers: Vec::new(),
      body: Bytes::new(),
    }
  }

  pub fn path(&self) -> &str {
    self.url.split(['?', '#']).next().unwrap_or_default()
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }

  /// Only GET responses are read from or written to caches.
  pub fn is_cacheable(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseDescriptor {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl ResponseDescriptor {
  pub fn new(status: u16, content_type: &str, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: vec![("content-type".into(), content_type.into())],
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> &str {
    self.header("content-type").unwrap_or("application/octet-stream")
  }
}

/// Cache lookup key: request method plus path-and-query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
  pub method: String,
  pub url: String,
}

impl RequestKey {
  pub fn new(method: &str, url: &str) -> Self {
    Self {
      method: method.to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  pub fn get(url: &str) -> Self {
    Self::new("GET", url)
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResource {
  pub request_key: RequestKey,
  pub status: u16,
  pub payload: Bytes,
  pub content_type: String,
  /// Unix seconds.
  pub stored_at: u64,
}

impl CachedResource {
  pub fn new(request_key: RequestKey, payload: impl Into<Bytes>, content_type: &str) -> Self {
    Self {
      request_key,
      status: 200,
      payload: payload.into(),
      content_type: content_type.to_string(),
      stored_at: unix_now(),
    }
  }

  pub fn from_response(request_key: RequestKey, resp: &ResponseDescriptor) -> Self {
    Self {
      request_key,
      status: resp.status,
      payload: resp.body.clone(),
      content_type: resp.content_type().to_string(),
      stored_at: unix_now(),
    }
  }

  pub fn to_response(&self) -> ResponseDescriptor {
    ResponseDescriptor::new(self.status, &self.content_type, self.payload.clone())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
  Installing,
  Waiting,
  Active,
  Redundant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
  Idle,
  Downloading,
  Completed,
  Failed,
}

/// Progress of one bundle download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
  pub resource_id: String,
  pub label: String,
  pub total_bytes: Option<u64>,
  pub received_bytes: u64,
  pub status: TaskStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status_code: Option<u16>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
  #[serde(skip_serializing_if = "Vec::is_empty", default)]
  pub failed_items: Vec<String>,
  pub progress: f64,
}

impl DownloadTask {
  /// Reported while the total size is unknown.
  pub const INDETERMINATE_PROGRESS: f64 = 0.5;

  pub fn new(resource_id: &str, label: &str) -> Self {
    Self {
      resource_id: resource_id.to_string(),
      label: label.to_string(),
      total_bytes: None,
      received_bytes: 0,
      status: TaskStatus::Idle,
      status_code: None,
      error: None,
      failed_items: Vec::new(),
      progress: 0.0,
    }
  }

  /// Idle -> Downloading. Returns false for any other transition.
  pub fn start(&mut self) -> bool {
    if self.status != TaskStatus::Idle {
      return false;
    }
    self.status = TaskStatus::Downloading;
    self.refresh_progress();
    true
  }

  /// Record the size announced by the server, if any.
  pub fn set_total(&mut self, total_bytes: Option<u64>) {
    if self.status != TaskStatus::Downloading {
      return;
    }
    self.total_bytes = total_bytes.filter(|t| *t > 0);
    self.refresh_progress();
  }

  /// Account for more received bytes. Never decreases the counter.
  pub fn advance(&mut self, bytes: u64) {
    if self.status != TaskStatus::Downloading {
      return;
    }
    self.received_bytes = self.received_bytes.saturating_add(bytes);
    self.refresh_progress();
  }

  pub fn complete(&mut self) {
    if self.status == TaskStatus::Downloading {
      self.status = TaskStatus::Completed;
      self.progress = 1.0;
    }
  }

  pub fn fail(&mut self, error: String, status_code: Option<u16>) {
    if !self.is_finished() {
      self.status = TaskStatus::Failed;
      self.error = Some(error);
      self.status_code = status_code;
    }
  }

  pub fn is_finished(&self) -> bool {
    matches!(self.status, TaskStatus::Completed | TaskStatus::Failed)
  }

  fn refresh_progress(&mut self) {
    self.progress = match self.total_bytes {
      Some(total) if total > 0 => (self.received_bytes as f64 / total as f64).min(1.0),
      _ => Self::INDETERMINATE_PROGRESS,
    };
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageEstimate {
  pub usage: u64,
  pub quota: Option<u64>,
}

pub fn unix_now() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_request_path_strips_query() {
    let req = RequestDescriptor::get("/api/odu/ogbe?lang=yo");
    assert_eq!(req.path(), "/api/odu/ogbe");
    assert_eq!(req.key().to_string(), "GET /api/odu/ogbe?lang=yo");
  }

  #[test]
  fn test_request_key_normalizes_method() {
    assert_eq!(RequestKey::new("get", "/"), RequestKey::get("/"));
  }

  #[test]
  fn test_task_progress_is_monotonic() {
    let mut task = DownloadTask::new("odu-database", "Odu database");
    assert!(task.start());
    task.set_total(Some(100));
    let mut last = task.received_bytes;
    for chunk in [10, 0, 25, 40, 25] {
      task.advance(chunk);
      assert!(task.received_bytes >= last);
      last = task.received_bytes;
    }
    assert_eq!(task.progress, 1.0);
    task.complete();
    assert_eq!(task.status, TaskStatus::Completed);
  }

  #[test]
  fn test_task_unknown_size_reports_midpoint() {
    let mut task = DownloadTask::new("learning", "Learning content");
    task.start();
    task.set_total(None);
    task.advance(4096);
    assert_eq!(task.progress, DownloadTask::INDETERMINATE_PROGRESS);
  }

  #[test]
  fn test_failed_task_does_not_resume() {
    let mut task = DownloadTask::new("card-manifest", "Card manifest");
    task.start();
    task.fail("HTTP 500".into(), Some(500));
    assert!(!task.start());
    task.advance(5);
    task.complete();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.received_bytes, 0);
    assert_eq!(task.status_code, Some(500));
  }

  #[test]
  fn test_cached_resource_replays_status() {
    let resp = ResponseDescriptor::new(203, "application/json", "{}");
    let cached = CachedResource::from_response(RequestKey::get("/api/x"), &resp);
    let replay = cached.to_response();
    assert_eq!(replay.status, 203);
    assert_eq!(replay.content_type(), "application/json");
  }
}
