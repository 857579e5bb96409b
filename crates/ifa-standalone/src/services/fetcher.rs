use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use ifa_core::config::Config;
use ifa_core::error::NetworkError;
use ifa_core::types::{RequestDescriptor, ResponseDescriptor, FORWARDED_HEADERS};
use std::time::Duration;

/// Response headers replayed to the client.
const RESPONSE_HEADERS: [&str; 4] = ["content-type", "cache-control", "etag", "last-modified"];

/// A response whose body is consumed chunk by chunk.
pub struct StreamingResponse {
  pub status: u16,
  pub content_length: Option<u64>,
  pub content_type: String,
  pub body: BoxStream<'static, Result<Bytes, NetworkError>>,
}

impl StreamingResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Access to the content origin.
pub trait Fetch: Send + Sync + 'static {
  /// Send an intercepted request upstream and buffer the response.
  fn fetch(
    &self,
    req: &RequestDescriptor,
  ) -> impl std::future::Future<Output = Result<ResponseDescriptor, NetworkError>> + Send;

  /// GET `url` and hand back the body as a stream.
  fn fetch_stream(
    &self,
    url: &str,
  ) -> impl std::future::Future<Output = Result<StreamingResponse, NetworkError>> + Send;
}

/// `reqwest` clients bound to the upstream origin.
///
/// Intercepted requests get the short per-request timeout. Streamed downloads
/// share the connect bound but may run for `download_timeout_secs` overall.
pub struct HttpFetcher {
  client: reqwest::Client,
  stream_client: reqwest::Client,
  origin: String,
}

impl HttpFetcher {
  pub fn new(config: &Config) -> Result<Self, String> {
    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    let client = reqwest::Client::builder()
      .timeout(request_timeout)
      .build()
      .map_err(|e| format!("HTTP client error: {}", e))?;
    let stream_client = reqwest::Client::builder()
      .connect_timeout(request_timeout)
      .timeout(Duration::from_secs(config.download_timeout_secs))
      .build()
      .map_err(|e| format!("HTTP client error: {}", e))?;
    Ok(Self {
      client,
      stream_client,
      origin: config.upstream_url.trim_end_matches('/').to_string(),
    })
  }

  fn absolute(&self, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
      url.to_string()
    } else {
      format!("{}{}", self.origin, url)
    }
  }
}

fn map_err(e: reqwest::Error) -> NetworkError {
  if e.is_timeout() {
    NetworkError::Timeout
  } else {
    NetworkError::Unreachable(e.to_string())
  }
}

impl Fetch for HttpFetcher {
  async fn fetch(&self, req: &RequestDescriptor) -> Result<ResponseDescriptor, NetworkError> {
    let method = reqwest::Method::from_bytes(req.method.as_bytes())
      .map_err(|e| NetworkError::Unreachable(format!("invalid method: {}", e)))?;

    let mut builder = self.client.request(method, self.absolute(&req.url));
    for (name, value) in &req.headers {
      if FORWARDED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
        builder = builder.header(name.as_str(), value.as_str());
      }
    }
    if !req.body.is_empty() {
      builder = builder.body(req.body.clone());
    }

    let resp = builder.send().await.map_err(map_err)?;
    let status = resp.status().as_u16();
    let headers = RESPONSE_HEADERS
      .iter()
      .filter_map(|name| {
        resp
          .headers()
          .get(*name)
          .and_then(|v| v.to_str().ok())
          .map(|v| (name.to_string(), v.to_string()))
      })
      .collect();
    let body = resp
      .bytes()
      .await
      .map_err(|e| NetworkError::Body(e.to_string()))?;

    Ok(ResponseDescriptor {
      status,
      headers,
      body,
    })
  }

  async fn fetch_stream(&self, url: &str) -> Result<StreamingResponse, NetworkError> {
    let resp = self
      .stream_client
      .get(self.absolute(url))
      .send()
      .await
      .map_err(map_err)?;

    let content_type = resp
      .headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("application/octet-stream")
      .to_string();

    Ok(StreamingResponse {
      status: resp.status().as_u16(),
      content_length: resp.content_length(),
      content_type,
      body: resp
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| NetworkError::Body(e.to_string())))
        .boxed(),
    })
  }
}
