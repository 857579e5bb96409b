//! Wire types for imperative cache commands sent from the main context to the proxy.
//!
//! Messages travel as `{ "type": "...", "data": { ... } }`.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
  CacheResource(CacheResourceData),
  ClearCache,
  GetCacheStatus,
  #[serde(other)]
  Unknown,
}

impl ControlMessage {
  /// Parse a raw message. Returns the message and its `type` tag for logging.
  pub fn parse(raw: &Value) -> Result<(Self, String), String> {
    let tag = raw
      .get("type")
      .and_then(Value::as_str)
      .ok_or_else(|| "message has no `type`".to_string())?
      .to_string();
    // Unit commands ignore any `data` the sender attached.
    let msg = match tag.as_str() {
      "CLEAR_CACHE" => ControlMessage::ClearCache,
      "GET_CACHE_STATUS" => ControlMessage::GetCacheStatus,
      "CACHE_RESOURCE" => {
        let data = raw.get("data").cloned().unwrap_or(Value::Null);
        let data = serde_json::from_value(data).map_err(|e| format!("{}: {}", tag, e))?;
        ControlMessage::CacheResource(data)
      }
      _ => ControlMessage::Unknown,
    };
    Ok((msg, tag))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
  Utf8,
  Base64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheResourceData {
  pub url: String,
  pub payload: Value,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub encoding: Option<PayloadEncoding>,
}

impl CacheResourceData {
  /// Seed a binary payload.
  pub fn binary(url: &str, payload: &[u8], content_type: &str) -> Self {
    Self {
      url: url.to_string(),
      payload: Value::String(base64::engine::general_purpose::STANDARD.encode(payload)),
      content_type: Some(content_type.to_string()),
      encoding: Some(PayloadEncoding::Base64),
    }
  }

  /// Decode the payload into bytes plus the content type to store it under.
  pub fn decode_payload(&self) -> Result<(Bytes, String), String> {
    match (&self.payload, self.encoding) {
      (Value::String(s), Some(PayloadEncoding::Base64)) => {
        let bytes = base64::engine::general_purpose::STANDARD
          .decode(s)
          .map_err(|e| format!("invalid base64 payload: {}", e))?;
        let ct = self
          .content_type
          .clone()
          .unwrap_or_else(|| "application/octet-stream".into());
        Ok((Bytes::from(bytes), ct))
      }
      (Value::String(s), _) => {
        let ct = self
          .content_type
          .clone()
          .unwrap_or_else(|| "text/plain; charset=utf-8".into());
        Ok((Bytes::from(s.clone().into_bytes()), ct))
      }
      (_, Some(PayloadEncoding::Base64)) => Err("base64 payload must be a string".into()),
      (other, _) => {
        let bytes = serde_json::to_vec(other).map_err(|e| e.to_string())?;
        let ct = self
          .content_type
          .clone()
          .unwrap_or_else(|| "application/json".into());
        Ok((Bytes::from(bytes), ct))
      }
    }
  }

  /// Path and query of `url`. Absolute URLs lose their origin so lookups match
  /// what the proxy sees.
  pub fn request_path(&self) -> Result<String, String> {
    normalize_url(&self.url)
  }
}

pub fn normalize_url(raw: &str) -> Result<String, String> {
  if raw.starts_with('/') {
    return Ok(raw.to_string());
  }
  let parsed = url::Url::parse(raw).map_err(|e| format!("invalid url {}: {}", raw, e))?;
  Ok(match parsed.query() {
    Some(q) => format!("{}?{}", parsed.path(), q),
    None => parsed.path().to_string(),
  })
}

/// One bucket in a `GET_CACHE_STATUS` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStatus {
  pub name: String,
  pub size: usize,
  pub resources: Vec<String>,
}

pub type CacheStatusReport = BTreeMap<String, BucketStatus>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ControlReply {
  Done { success: bool },
  Status(CacheStatusReport),
  Ignored { ignored: bool },
  Error { error: String },
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_known_messages() {
    let (msg, tag) = ControlMessage::parse(&json!({"type": "CLEAR_CACHE"})).unwrap();
    assert_eq!(msg, ControlMessage::ClearCache);
    assert_eq!(tag, "CLEAR_CACHE");

    let (msg, _) = ControlMessage::parse(&json!({
      "type": "CACHE_RESOURCE",
      "data": {"url": "/api/odu/ogbe", "payload": {"id": "ogbe"}}
    }))
    .unwrap();
    match msg {
      ControlMessage::CacheResource(data) => assert_eq!(data.url, "/api/odu/ogbe"),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn test_unknown_type_parses_as_unknown() {
    let (msg, tag) = ControlMessage::parse(&json!({"type": "SKIP_WAITING"})).unwrap();
    assert_eq!(msg, ControlMessage::Unknown);
    assert_eq!(tag, "SKIP_WAITING");
  }

  #[test]
  fn test_missing_type_is_rejected() {
    assert!(ControlMessage::parse(&json!({"data": {}})).is_err());
  }

  #[test]
  fn test_payload_decoding() {
    let data = CacheResourceData::binary("/x.png", &[0, 159, 146, 150], "image/png");
    let (bytes, ct) = data.decode_payload().unwrap();
    assert_eq!(&bytes[..], &[0, 159, 146, 150]);
    assert_eq!(ct, "image/png");

    let json_payload = CacheResourceData {
      url: "/api/odu/ogbe".into(),
      payload: json!({"id": "ogbe"}),
      content_type: None,
      encoding: None,
    };
    let (bytes, ct) = json_payload.decode_payload().unwrap();
    assert_eq!(&bytes[..], br#"{"id":"ogbe"}"#);
    assert_eq!(ct, "application/json");
  }

  #[test]
  fn test_normalize_url() {
    assert_eq!(normalize_url("/a?b=1").unwrap(), "/a?b=1");
    assert_eq!(
      normalize_url("https://ifa.example/static/x.png?v=2").unwrap(),
      "/static/x.png?v=2"
    );
    assert!(normalize_url("not a url").is_err());
  }

  #[test]
  fn test_status_reply_shape() {
    let mut report = CacheStatusReport::new();
    report.insert(
      "ifa-essential-v3".into(),
      BucketStatus {
        name: "ifa-essential-v3".into(),
        size: 1,
        resources: vec!["/".into()],
      },
    );
    let v = serde_json::to_value(ControlReply::Status(report)).unwrap();
    assert_eq!(
      v,
      json!({"ifa-essential-v3": {"name": "ifa-essential-v3", "size": 1, "resources": ["/"]}})
    );
  }
}
