/// Version tag baked into every bucket name. Bump on redeploy to retire old caches.
pub const CACHE_VERSION: &str = "v3";

/// Bucket holding the application shell and everything cached while browsing.
pub const ESSENTIAL_BUCKET: &str = "ifa-essential-v3";

/// Bucket holding resources seeded by bulk downloads.
pub const OFFLINE_BUCKET: &str = "ifa-offline-v3";

/// Buckets that survive activation. Anything else is purged.
pub const RETAINED_BUCKETS: [&str; 2] = [ESSENTIAL_BUCKET, OFFLINE_BUCKET];

pub const API_PREFIX: &str = "/api/";
pub const STATIC_PREFIX: &str = "/static/";

/// Routes served by the proxy itself and never forwarded upstream.
pub const CONTROL_PREFIX: &str = "/__offline";

pub const PLACEHOLDER_IMAGE: &str = "/static/images/placeholder.png";

/// Resources that must be cached before the proxy may activate.
pub const ESSENTIAL_MANIFEST: [&str; 6] = [
  "/",
  "/index.html",
  "/manifest.json",
  "/static/css/main.css",
  "/static/js/main.js",
  PLACEHOLDER_IMAGE,
];

/// Server configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
  pub port: u16,
  pub data_dir: String,
  pub upstream_url: String,
  pub request_timeout_secs: u64,
  /// Total budget for one streamed bundle or image download.
  pub download_timeout_secs: u64,
  pub image_concurrency: usize,
  pub write_chunk_size: usize,
  pub storage_quota_bytes: Option<u64>,
}

impl Config {
  pub fn from_env() -> Self {
    let defaults = Self::default();
    Self {
      port: env_parse("PORT").unwrap_or(defaults.port),
      data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
      upstream_url: std::env::var("UPSTREAM_URL")
        .map(|v| v.trim_end_matches('/').to_string())
        .unwrap_or(defaults.upstream_url),
      request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS")
        .unwrap_or(defaults.request_timeout_secs),
      download_timeout_secs: env_parse("DOWNLOAD_TIMEOUT_SECS")
        .unwrap_or(defaults.download_timeout_secs),
      image_concurrency: env_parse("IMAGE_CONCURRENCY")
        .filter(|n: &usize| *n > 0)
        .unwrap_or(defaults.image_concurrency),
      write_chunk_size: env_parse("WRITE_CHUNK_SIZE")
        .filter(|n: &usize| *n > 0)
        .unwrap_or(defaults.write_chunk_size),
      storage_quota_bytes: env_parse("STORAGE_QUOTA_BYTES"),
    }
  }

  pub fn store_dir(&self) -> String {
    format!("{}/store", self.data_dir)
  }

  pub fn caches_dir(&self) -> String {
    format!("{}/caches", self.data_dir)
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      port: 8080,
      data_dir: "./data".into(),
      upstream_url: "http://127.0.0.1:3000".into(),
      request_timeout_secs: 60,
      download_timeout_secs: 600,
      image_concurrency: 4,
      write_chunk_size: 50,
      storage_quota_bytes: None,
    }
  }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
  std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.data_dir, "./data");
    assert_eq!(cfg.write_chunk_size, 50);
    assert!(cfg.download_timeout_secs > cfg.request_timeout_secs);
    assert!(cfg.storage_quota_bytes.is_none());
  }

  #[test]
  fn test_data_subdirs() {
    let cfg = Config {
      data_dir: "/data".into(),
      ..Config::default()
    };
    assert_eq!(cfg.store_dir(), "/data/store");
    assert_eq!(cfg.caches_dir(), "/data/caches");
  }

  #[test]
  fn test_bucket_names_carry_version() {
    for name in RETAINED_BUCKETS {
      assert!(name.ends_with(CACHE_VERSION));
    }
    assert!(ESSENTIAL_MANIFEST.contains(&PLACEHOLDER_IMAGE));
  }
}
