use ifa_core::config::{
  ESSENTIAL_BUCKET, ESSENTIAL_MANIFEST, OFFLINE_BUCKET, PLACEHOLDER_IMAGE, RETAINED_BUCKETS,
};
use ifa_core::control::{BucketStatus, CacheResourceData, CacheStatusReport};
use ifa_core::error::{ProxyError, StorageError};
use ifa_core::routing::{self, RequestClass};
use ifa_core::storage::CacheStorage;
use ifa_core::types::{
  CachedResource, LifecycleState, RequestDescriptor, RequestKey, ResponseDescriptor,
};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::services::fetcher::Fetch;

/// Intercepts application requests and answers them from the network or the
/// cache buckets, depending on the request class.
pub struct Proxy<F, C> {
  fetcher: Arc<F>,
  cache: Arc<C>,
  state: RwLock<LifecycleState>,
}

impl<F: Fetch, C: CacheStorage> Proxy<F, C> {
  pub fn new(fetcher: Arc<F>, cache: Arc<C>) -> Self {
    Self {
      fetcher,
      cache,
      state: RwLock::new(LifecycleState::Installing),
    }
  }

  pub async fn state(&self) -> LifecycleState {
    *self.state.read().await
  }

  pub fn cache(&self) -> &C {
    &self.cache
  }

  /// Populate the essential bucket with the shell manifest. Nothing is written
  /// unless every entry was fetched.
  pub async fn install(&self) -> Result<(), ProxyError> {
    *self.state.write().await = LifecycleState::Installing;

    match self.fetch_manifest().await {
      Ok(resources) => {
        if let Err(e) = self.cache.put_all(ESSENTIAL_BUCKET, resources).await {
          *self.state.write().await = LifecycleState::Redundant;
          return Err(e.into());
        }
        *self.state.write().await = LifecycleState::Waiting;
        tracing::info!(
          "Installed {} essential resources into {}",
          ESSENTIAL_MANIFEST.len(),
          ESSENTIAL_BUCKET
        );
        Ok(())
      }
      Err(e) => {
        if self.has_installed_shell().await {
          tracing::warn!("Install fetch failed ({}), keeping existing {}", e, ESSENTIAL_BUCKET);
          *self.state.write().await = LifecycleState::Waiting;
          return Ok(());
        }
        *self.state.write().await = LifecycleState::Redundant;
        Err(e)
      }
    }
  }

  /// True when a previous run left every manifest entry in the current
  /// essential bucket.
  async fn has_installed_shell(&self) -> bool {
    let keys = match self.cache.keys(ESSENTIAL_BUCKET).await {
      Ok(keys) => keys,
      Err(e) => {
        tracing::warn!("Cannot read {}: {}", ESSENTIAL_BUCKET, e);
        return false;
      }
    };
    ESSENTIAL_MANIFEST
      .iter()
      .all(|url| keys.contains(&RequestKey::get(url)))
  }

  async fn fetch_manifest(&self) -> Result<Vec<CachedResource>, ProxyError> {
    let mut resources = Vec::with_capacity(ESSENTIAL_MANIFEST.len());
    for url in ESSENTIAL_MANIFEST {
      let req = RequestDescriptor::get(url);
      let resp = self
        .fetcher
        .fetch(&req)
        .await
        .map_err(|e| ProxyError::InstallFailed {
          url: url.to_string(),
          reason: e.to_string(),
        })?;
      if !resp.is_success() {
        return Err(ProxyError::InstallFailed {
          url: url.to_string(),
          reason: format!("HTTP {}", resp.status),
        });
      }
      resources.push(CachedResource::from_response(req.key(), &resp));
    }
    Ok(resources)
  }

  /// Purge every bucket outside the retain-list and start intercepting.
  /// Returns the names of the deleted buckets.
  pub async fn activate(&self) -> Result<Vec<String>, ProxyError> {
    let mut state = self.state.write().await;
    match *state {
      LifecycleState::Waiting => {}
      LifecycleState::Active => return Ok(Vec::new()),
      other => {
        return Err(ProxyError::InvalidState {
          action: "activate",
          state: format!("{:?}", other).to_lowercase(),
        })
      }
    }

    let mut deleted = Vec::new();
    for name in self.cache.list_buckets().await? {
      if RETAINED_BUCKETS.contains(&name.as_str()) {
        continue;
      }
      if self.cache.delete_bucket(&name).await? {
        tracing::info!("Purged stale cache bucket {}", name);
        deleted.push(name);
      }
    }

    *state = LifecycleState::Active;
    tracing::info!("Proxy active, {} stale buckets purged", deleted.len());
    Ok(deleted)
  }

  pub async fn retire(&self) {
    *self.state.write().await = LifecycleState::Redundant;
    tracing::info!("Proxy retired");
  }

  /// Answer one intercepted request. Always resolves to a response.
  pub async fn handle(&self, req: RequestDescriptor) -> ResponseDescriptor {
    if self.state().await != LifecycleState::Active {
      return self.pass_through(&req).await;
    }

    match routing::classify(req.path()) {
      RequestClass::Api => self.network_first_api(&req).await,
      RequestClass::Static => self.cache_first_static(&req).await,
      RequestClass::Page => self.network_first_page(&req).await,
    }
  }

  async fn pass_through(&self, req: &RequestDescriptor) -> ResponseDescriptor {
    match self.fetcher.fetch(req).await {
      Ok(resp) => resp,
      Err(e) => {
        tracing::warn!("Upstream unreachable for {} {}: {}", req.method, req.url, e);
        ResponseDescriptor::new(502, "text/plain", "Bad gateway")
      }
    }
  }

  async fn network_first_api(&self, req: &RequestDescriptor) -> ResponseDescriptor {
    match self.fetcher.fetch(req).await {
      Ok(resp) => {
        self.remember(req, &resp).await;
        resp
      }
      Err(e) => {
        tracing::debug!("Network failed for {}: {}", req.url, e);
        match self.cached(req).await {
          Some(hit) => hit,
          None => routing::api_fallback(req.path()),
        }
      }
    }
  }

  async fn cache_first_static(&self, req: &RequestDescriptor) -> ResponseDescriptor {
    if let Some(hit) = self.cached(req).await {
      return hit;
    }

    match self.fetcher.fetch(req).await {
      Ok(resp) => {
        self.remember(req, &resp).await;
        resp
      }
      Err(e) => {
        tracing::debug!("Network failed for {}: {}", req.url, e);
        if routing::is_image_path(req.path()) {
          if let Some(placeholder) = self.lookup(&RequestKey::get(PLACEHOLDER_IMAGE)).await {
            return placeholder.to_response();
          }
        }
        routing::static_unavailable()
      }
    }
  }

  async fn network_first_page(&self, req: &RequestDescriptor) -> ResponseDescriptor {
    match self.fetcher.fetch(req).await {
      Ok(resp) => {
        self.remember(req, &resp).await;
        resp
      }
      Err(e) => {
        tracing::debug!("Network failed for {}: {}", req.url, e);
        if let Some(hit) = self.cached(req).await {
          return hit;
        }
        match self.lookup(&RequestKey::get("/")).await {
          Some(shell) => shell.to_response(),
          None => routing::page_unavailable(),
        }
      }
    }
  }

  async fn cached(&self, req: &RequestDescriptor) -> Option<ResponseDescriptor> {
    if !req.is_cacheable() {
      return None;
    }
    self.lookup(&req.key()).await.map(|r| r.to_response())
  }

  /// Cache reads never fail a request; storage trouble is a miss.
  async fn lookup(&self, key: &RequestKey) -> Option<CachedResource> {
    match self.cache.lookup(None, key).await {
      Ok(hit) => hit,
      Err(e) => {
        tracing::warn!("Cache lookup for {} failed: {}", key, e);
        None
      }
    }
  }

  async fn remember(&self, req: &RequestDescriptor, resp: &ResponseDescriptor) {
    if !req.is_cacheable() || !resp.is_success() {
      return;
    }
    let resource = CachedResource::from_response(req.key(), resp);
    if let Err(e) = self.cache.put(ESSENTIAL_BUCKET, resource).await {
      tracing::warn!("Failed to cache {}: {}", req.url, e);
    }
  }

  /// Seed an entry into the offline bucket on behalf of the main context.
  pub async fn seed(&self, data: &CacheResourceData) -> Result<RequestKey, String> {
    let path = data.request_path()?;
    let (payload, content_type) = data.decode_payload()?;
    let key = RequestKey::get(&path);
    self
      .cache
      .put(
        OFFLINE_BUCKET,
        CachedResource::new(key.clone(), payload, &content_type),
      )
      .await
      .map_err(|e| e.to_string())?;
    Ok(key)
  }

  /// Delete every bucket. Returns how many were removed.
  pub async fn clear_buckets(&self) -> Result<usize, StorageError> {
    let mut removed = 0;
    for name in self.cache.list_buckets().await? {
      if self.cache.delete_bucket(&name).await? {
        removed += 1;
      }
    }
    Ok(removed)
  }

  pub async fn cache_status(&self) -> Result<CacheStatusReport, StorageError> {
    let mut report = CacheStatusReport::new();
    for name in self.cache.list_buckets().await? {
      let keys = self.cache.keys(&name).await?;
      report.insert(
        name.clone(),
        BucketStatus {
          name,
          size: keys.len(),
          resources: keys.into_iter().map(|k| k.url).collect(),
        },
      );
    }
    Ok(report)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::services::cache_storage::FileCacheStorage;
  use crate::services::fetcher::testing::FakeFetcher;
  use serde_json::Value;

  pub(crate) fn shell_fetcher() -> FakeFetcher {
    FakeFetcher::new()
      .respond("/", 200, "text/html", "<html>shell</html>")
      .respond("/index.html", 200, "text/html", "<html>shell</html>")
      .respond("/manifest.json", 200, "application/json", "{}")
      .respond("/static/css/main.css", 200, "text/css", "body{}")
      .respond("/static/js/main.js", 200, "text/javascript", "main()")
      .respond(PLACEHOLDER_IMAGE, 200, "image/png", &b"\x89PNG placeholder"[..])
  }

  type TestProxy = Proxy<FakeFetcher, FileCacheStorage>;

  fn proxy(dir: &tempfile::TempDir, fetcher: FakeFetcher) -> (Arc<FakeFetcher>, TestProxy) {
    let fetcher = Arc::new(fetcher);
    let cache = Arc::new(FileCacheStorage::new(dir.path().join("caches"), dir.path(), None));
    (fetcher.clone(), Proxy::new(fetcher, cache))
  }

  async fn active(dir: &tempfile::TempDir, fetcher: FakeFetcher) -> (Arc<FakeFetcher>, TestProxy) {
    let (f, p) = proxy(dir, fetcher);
    p.install().await.unwrap();
    p.activate().await.unwrap();
    (f, p)
  }

  #[tokio::test]
  async fn test_install_populates_essential_bucket() {
    let dir = tempfile::tempdir().unwrap();
    let (_, p) = proxy(&dir, shell_fetcher());
    p.install().await.unwrap();
    assert_eq!(p.state().await, LifecycleState::Waiting);
    let keys = p.cache().keys(ESSENTIAL_BUCKET).await.unwrap();
    assert_eq!(keys.len(), ESSENTIAL_MANIFEST.len());
  }

  #[tokio::test]
  async fn test_install_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (_, p) = proxy(&dir, shell_fetcher());
    p.install().await.unwrap();
    p.install().await.unwrap();
    assert_eq!(p.cache().list_buckets().await.unwrap(), vec![ESSENTIAL_BUCKET]);
    let keys = p.cache().keys(ESSENTIAL_BUCKET).await.unwrap();
    assert_eq!(keys.len(), ESSENTIAL_MANIFEST.len());
  }

  #[tokio::test]
  async fn test_install_fails_when_any_manifest_entry_fails() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = shell_fetcher().respond("/static/js/main.js", 500, "text/plain", "boom");
    let (_, p) = proxy(&dir, fetcher);
    let err = p.install().await.unwrap_err();
    assert!(matches!(err, ProxyError::InstallFailed { ref url, .. } if url == "/static/js/main.js"));
    assert_eq!(p.state().await, LifecycleState::Redundant);
    assert!(p.cache().keys(ESSENTIAL_BUCKET).await.unwrap().is_empty());
    assert!(p.activate().await.is_err());
  }

  #[tokio::test]
  async fn test_offline_restart_reuses_installed_shell() {
    let dir = tempfile::tempdir().unwrap();
    active(&dir, shell_fetcher()).await;

    let restarted = shell_fetcher();
    restarted.set_offline(true);
    let (_, p) = proxy(&dir, restarted);
    p.install().await.unwrap();
    assert_eq!(p.state().await, LifecycleState::Waiting);
    p.activate().await.unwrap();
    assert_eq!(p.state().await, LifecycleState::Active);

    let page = p.handle(RequestDescriptor::get("/")).await;
    assert_eq!(page.status, 200);
    assert_eq!(&page.body[..], b"<html>shell</html>");

    let api = p.handle(RequestDescriptor::get("/api/odu/daily")).await;
    assert_eq!(api.status, 503);
    let body: Value = serde_json::from_slice(&api.body).unwrap();
    assert_eq!(body["error"], "Offline Mode");
  }

  #[tokio::test]
  async fn test_offline_restart_with_partial_shell_stays_redundant() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = shell_fetcher();
    fetcher.set_offline(true);
    let (_, p) = proxy(&dir, fetcher);
    let shell = CachedResource::new(RequestKey::get("/"), "<html>shell</html>", "text/html");
    p.cache().put(ESSENTIAL_BUCKET, shell).await.unwrap();

    assert!(p.install().await.is_err());
    assert_eq!(p.state().await, LifecycleState::Redundant);
  }

  #[tokio::test]
  async fn test_activation_purges_stale_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let (_, p) = proxy(&dir, shell_fetcher());
    let old = CachedResource::new(RequestKey::get("/"), "old shell", "text/html");
    p.cache().put("ifa-essential-v2", old.clone()).await.unwrap();
    p.cache().put("ifa-offline-v2", old).await.unwrap();

    p.install().await.unwrap();
    let deleted = p.activate().await.unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(p.state().await, LifecycleState::Active);
    for name in p.cache().list_buckets().await.unwrap() {
      assert!(RETAINED_BUCKETS.contains(&name.as_str()));
    }
  }

  #[tokio::test]
  async fn test_api_success_is_cached_and_served_offline() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = shell_fetcher().respond("/api/odu/daily", 200, "application/json", r#"{"odu":"ogbe"}"#);
    let (f, p) = active(&dir, fetcher).await;

    let live = p.handle(RequestDescriptor::get("/api/odu/daily")).await;
    assert_eq!(live.status, 200);

    f.set_offline(true);
    let offline = p.handle(RequestDescriptor::get("/api/odu/daily")).await;
    assert_eq!(offline.status, 200);
    assert_eq!(&offline.body[..], br#"{"odu":"ogbe"}"#);
  }

  #[tokio::test]
  async fn test_api_offline_miss_returns_divination_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let (f, p) = active(&dir, shell_fetcher()).await;
    f.set_offline(true);

    let resp = p.handle(RequestDescriptor::get("/api/odu/ogbe-meji")).await;
    assert_eq!(resp.status, 503);
    let body: Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["error"], "Offline Mode");
    assert_eq!(
      body["message"],
      "This data is not available offline. Please download offline resources when connected."
    );
    assert_eq!(body["offline"], true);
  }

  #[tokio::test]
  async fn test_api_error_status_is_returned_live_and_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = shell_fetcher().respond("/api/recommend", 500, "application/json", "{}");
    let (f, p) = active(&dir, fetcher).await;
    assert_eq!(p.handle(RequestDescriptor::get("/api/recommend")).await.status, 500);

    f.set_offline(true);
    let resp = p.handle(RequestDescriptor::get("/api/recommend")).await;
    assert_eq!(resp.status, 503);
    let body: Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body["error"], "Service Unavailable");
  }

  #[tokio::test]
  async fn test_static_is_cache_first() {
    let dir = tempfile::tempdir().unwrap();
    let (f, p) = active(&dir, shell_fetcher()).await;
    let before = f.calls().len();
    let resp = p.handle(RequestDescriptor::get("/static/css/main.css")).await;
    assert_eq!(&resp.body[..], b"body{}");
    assert_eq!(f.calls().len(), before);
  }

  #[tokio::test]
  async fn test_static_image_miss_offline_gets_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let (f, p) = active(&dir, shell_fetcher()).await;
    f.set_offline(true);

    let img = p.handle(RequestDescriptor::get("/static/images/cards/ogbe.png")).await;
    assert_eq!(img.status, 200);
    assert_eq!(&img.body[..], b"\x89PNG placeholder");

    let font = p.handle(RequestDescriptor::get("/static/fonts/yoruba.woff2")).await;
    assert_eq!(font.status, 404);
    assert_eq!(&font.body[..], b"Resource not available offline");
  }

  #[tokio::test]
  async fn test_page_offline_falls_back_to_shell() {
    let dir = tempfile::tempdir().unwrap();
    let (f, p) = active(&dir, shell_fetcher()).await;
    f.set_offline(true);
    let resp = p.handle(RequestDescriptor::get("/encyclopedia/oyeku-meji")).await;
    assert_eq!(resp.status, 200);
    assert_eq!(&resp.body[..], b"<html>shell</html>");
  }

  #[tokio::test]
  async fn test_non_get_is_never_cached() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = shell_fetcher().respond("/api/journal", 200, "application/json", "{}");
    let (f, p) = active(&dir, fetcher).await;
    let post = RequestDescriptor {
      method: "POST".into(),
      ..RequestDescriptor::get("/api/journal")
    };
    assert_eq!(p.handle(post.clone()).await.status, 200);
    f.set_offline(true);
    assert_eq!(p.handle(post).await.status, 503);
  }

  #[tokio::test]
  async fn test_seeded_resource_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let (f, p) = active(&dir, shell_fetcher()).await;
    let bytes: Vec<u8> = (0..=255).collect();
    let data = CacheResourceData::binary("https://ifa.example/static/images/cards/irosun.png", &bytes, "image/png");
    let key = p.seed(&data).await.unwrap();
    assert_eq!(key, RequestKey::get("/static/images/cards/irosun.png"));

    f.set_offline(true);
    let resp = p.handle(RequestDescriptor::get("/static/images/cards/irosun.png")).await;
    assert_eq!(resp.body.to_vec(), bytes);
    assert_eq!(resp.content_type(), "image/png");
  }

  #[tokio::test]
  async fn test_cache_status_and_clear() {
    let dir = tempfile::tempdir().unwrap();
    let (_, p) = active(&dir, shell_fetcher()).await;
    let report = p.cache_status().await.unwrap();
    let essential = &report[ESSENTIAL_BUCKET];
    assert_eq!(essential.size, ESSENTIAL_MANIFEST.len());
    assert!(essential.resources.contains(&"/".to_string()));

    assert_eq!(p.clear_buckets().await.unwrap(), 1);
    assert!(p.cache_status().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_inactive_proxy_passes_through() {
    let dir = tempfile::tempdir().unwrap();
    let (f, p) = proxy(&dir, shell_fetcher());
    f.set_offline(true);
    let resp = p.handle(RequestDescriptor::get("/api/odu/daily")).await;
    assert_eq!(resp.status, 502);
  }
}
