use ifa_core::config::Config;
use ifa_core::storage::ObjectStore;
use std::sync::Arc;

use crate::services::cache_storage::FileCacheStorage;
use crate::services::control_channel::{self, ControlHandle};
use crate::services::download_manager::DownloadManager;
use crate::services::fetcher::{Fetch, HttpFetcher};
use crate::services::object_store::FileObjectStore;
use crate::services::proxy::Proxy;

pub type SharedProxy<F> = Arc<Proxy<F, FileCacheStorage>>;
pub type SharedDownloads<F> = Arc<DownloadManager<F, FileObjectStore>>;

/// Shared application state.
pub struct AppState<F = HttpFetcher> {
  pub config: Config,
  pub proxy: SharedProxy<F>,
  pub downloads: SharedDownloads<F>,
  pub control: ControlHandle,
}

impl<F> Clone for AppState<F> {
  fn clone(&self) -> Self {
    Self {
      config: self.config.clone(),
      proxy: self.proxy.clone(),
      downloads: self.downloads.clone(),
      control: self.control.clone(),
    }
  }
}

impl<F: Fetch> AppState<F> {
  pub async fn new(config: Config, fetcher: F) -> Self {
    let fetcher = Arc::new(fetcher);
    let cache = Arc::new(FileCacheStorage::new(
      config.caches_dir(),
      &config.data_dir,
      config.storage_quota_bytes,
    ));
    let proxy = Arc::new(Proxy::new(fetcher.clone(), cache));

    let (control, rx) = control_channel::channel(64);
    tokio::spawn(control_channel::run(proxy.clone(), rx));

    // An unavailable store is remembered; downloads and queries report it.
    let store = Arc::new(FileObjectStore::new(config.store_dir()));
    if let Err(e) = store.open().await {
      tracing::warn!("Offline data disabled: {}", e);
    }

    let downloads = Arc::new(DownloadManager::new(
      &config,
      fetcher,
      store,
      control.clone(),
    ));

    Self {
      config,
      proxy,
      downloads,
      control,
    }
  }
}
