use serde::Serialize;

use crate::config::{API_PREFIX, STATIC_PREFIX};
use crate::types::ResponseDescriptor;

/// Path marker for divination data endpoints.
pub const DIVINATION_MARKER: &str = "/api/odu";
/// Path marker for offline resource endpoints.
pub const OFFLINE_MARKER: &str = "/api/offline";

const IMAGE_EXTENSIONS: [&str; 7] = [".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico"];

pub const STATIC_UNAVAILABLE: &str = "Resource not available offline";
pub const PAGE_UNAVAILABLE: &str = "Offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Network-first with a JSON fallback.
  Api,
  /// Cache-first with a placeholder fallback.
  Static,
  /// Network-first with the cached shell as fallback.
  Page,
}

pub fn classify(path: &str) -> RequestClass {
  if path.starts_with(API_PREFIX) {
    RequestClass::Api
  } else if path.starts_with(STATIC_PREFIX) {
    RequestClass::Static
  } else {
    RequestClass::Page
  }
}

pub fn is_image_path(path: &str) -> bool {
  let lower = path.to_ascii_lowercase();
  IMAGE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackBody {
  pub error: &'static str,
  pub message: &'static str,
  pub offline: bool,
}

impl FallbackBody {
  pub fn for_path(path: &str) -> Self {
    let (error, message) = if path.contains(DIVINATION_MARKER) {
      (
        "Offline Mode",
        "This data is not available offline. Please download offline resources when connected.",
      )
    } else if path.contains(OFFLINE_MARKER) {
      (
        "Network Required",
        "Internet connection required to download offline resources.",
      )
    } else {
      ("Service Unavailable", "This service is not available offline.")
    };
    Self {
      error,
      message,
      offline: true,
    }
  }
}

/// 503 JSON response for an API request that neither network nor cache could answer.
pub fn api_fallback(path: &str) -> ResponseDescriptor {
  let body = serde_json::to_vec(&FallbackBody::for_path(path)).unwrap_or_default();
  ResponseDescriptor::new(503, "application/json", body)
}

pub fn static_unavailable() -> ResponseDescriptor {
  ResponseDescriptor::new(404, "text/plain", STATIC_UNAVAILABLE)
}

pub fn page_unavailable() -> ResponseDescriptor {
  ResponseDescriptor::new(503, "text/plain", PAGE_UNAVAILABLE)
}
