use bytes::Bytes;
use ifa_core::config::{ESSENTIAL_BUCKET, OFFLINE_BUCKET};
use ifa_core::error::StorageError;
use ifa_core::storage::CacheStorage;
use ifa_core::types::{CachedResource, RequestKey, StorageEstimate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::services::disk::{dir_size, write_atomic};

const INDEX_FILE: &str = "index.json";

/// Index entry; the payload lives in `blob` next to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
  key: RequestKey,
  status: u16,
  content_type: String,
  stored_at: u64,
  size: u64,
  blob: String,
}

struct Bucket {
  dir: PathBuf,
  /// Insertion order, unique by key.
  entries: Vec<Entry>,
}

impl Bucket {
  fn position(&self, key: &RequestKey) -> Option<usize> {
    self.entries.iter().position(|e| &e.key == key)
  }

  /// Insert or replace. Returns the blob that is no longer referenced.
  fn upsert(&mut self, entry: Entry) -> Option<String> {
    match self.position(&entry.key) {
      Some(i) => Some(std::mem::replace(&mut self.entries[i], entry).blob),
      None => {
        self.entries.push(entry);
        None
      }
    }
  }

  async fn persist(&self) -> Result<(), StorageError> {
    let data = serde_json::to_vec_pretty(&self.entries).map_err(|e| StorageError::Corrupt {
      path: self.dir.display().to_string(),
      reason: e.to_string(),
    })?;
    write_atomic(&self.dir.join(INDEX_FILE), &data).await?;
    Ok(())
  }
}

type Buckets = RwLock<HashMap<String, Arc<RwLock<Bucket>>>>;

/// Versioned cache buckets on disk: one directory per bucket holding an
/// `index.json` plus one blob file per cached resource.
pub struct FileCacheStorage {
  root: PathBuf,
  usage_root: PathBuf,
  quota: Option<u64>,
  buckets: OnceCell<Result<Buckets, String>>,
}

impl FileCacheStorage {
  /// `usage_root` is the directory whose total size is reported as usage.
  pub fn new(root: impl Into<PathBuf>, usage_root: impl Into<PathBuf>, quota: Option<u64>) -> Self {
    Self {
      root: root.into(),
      usage_root: usage_root.into(),
      quota,
      buckets: OnceCell::new(),
    }
  }

  async fn buckets(&self) -> Result<&Buckets, StorageError> {
    let loaded = self
      .buckets
      .get_or_init(|| async {
        match load(&self.root).await {
          Ok(map) => Ok(RwLock::new(map)),
          Err(e) => {
            tracing::error!("Cache storage unavailable at {}: {}", self.root.display(), e);
            Err(e.to_string())
          }
        }
      })
      .await;
    loaded
      .as_ref()
      .map_err(|e| StorageError::Unavailable(e.clone()))
  }

  async fn bucket(&self, name: &str, create: bool) -> Result<Option<Arc<RwLock<Bucket>>>, StorageError> {
    let buckets = self.buckets().await?;
    if let Some(b) = buckets.read().await.get(name) {
      return Ok(Some(b.clone()));
    }
    if !create {
      return Ok(None);
    }

    validate_bucket_name(name)?;
    let mut map = buckets.write().await;
    if let Some(b) = map.get(name) {
      return Ok(Some(b.clone()));
    }
    let dir = self.root.join(name);
    tokio::fs::create_dir_all(&dir).await?;
    let bucket = Bucket {
      dir,
      entries: Vec::new(),
    };
    bucket.persist().await?;
    tracing::debug!("Opened cache bucket {}", name);
    let bucket = Arc::new(RwLock::new(bucket));
    map.insert(name.to_string(), bucket.clone());
    Ok(Some(bucket))
  }

  /// Essential first, then the offline overlay, then anything else by name.
  async fn lookup_order(&self) -> Result<Vec<Arc<RwLock<Bucket>>>, StorageError> {
    let map = self.buckets().await?.read().await;
    let mut names: Vec<&String> = map.keys().collect();
    names.sort_by_key(|n| match n.as_str() {
      ESSENTIAL_BUCKET => (0, n.to_string()),
      OFFLINE_BUCKET => (1, n.to_string()),
      _ => (2, n.to_string()),
    });
    Ok(names.into_iter().map(|n| map[n].clone()).collect())
  }

  async fn write_blob(dir: &Path, payload: &Bytes) -> Result<String, StorageError> {
    let blob = format!("{}.bin", uuid::Uuid::new_v4());
    write_atomic(&dir.join(&blob), payload).await?;
    Ok(blob)
  }
}

fn validate_bucket_name(name: &str) -> Result<(), StorageError> {
  let ok = !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    && !name.starts_with('.');
  if ok {
    Ok(())
  } else {
    Err(StorageError::Unavailable(format!("invalid bucket name: {}", name)))
  }
}

async fn load(root: &Path) -> Result<HashMap<String, Arc<RwLock<Bucket>>>, StorageError> {
  tokio::fs::create_dir_all(root).await?;
  let root = root.to_path_buf();
  let loaded = tokio::task::spawn_blocking(move || load_sync(&root))
    .await
    .map_err(|e| StorageError::Unavailable(format!("load task failed: {}", e)))??;

  tracing::info!("Loaded {} cache buckets from disk", loaded.len());
  Ok(
    loaded
      .into_iter()
      .map(|b| {
        let name = b
          .dir
          .file_name()
          .map(|n| n.to_string_lossy().to_string())
          .unwrap_or_default();
        (name, Arc::new(RwLock::new(b)))
      })
      .collect(),
  )
}

fn load_sync(root: &Path) -> Result<Vec<Bucket>, StorageError> {
  let mut buckets = Vec::new();
  for entry in std::fs::read_dir(root)?.flatten() {
    let dir = entry.path();
    if !dir.is_dir() {
      continue;
    }

    let entries: Vec<Entry> = match std::fs::read(dir.join(INDEX_FILE))
      .ok()
      .and_then(|d| serde_json::from_slice(&d).ok())
    {
      Some(e) => e,
      None => {
        // A bucket without a readable index cannot be served from.
        tracing::warn!("Discarding cache bucket without index: {}", dir.display());
        let _ = std::fs::remove_dir_all(&dir);
        continue;
      }
    };

    clean_orphaned_blobs(&dir, &entries);
    buckets.push(Bucket { dir, entries });
  }
  Ok(buckets)
}

fn clean_orphaned_blobs(dir: &Path, entries: &[Entry]) {
  let known: HashSet<&str> = entries.iter().map(|e| e.blob.as_str()).collect();
  let files = match std::fs::read_dir(dir) {
    Ok(f) => f,
    Err(_) => return,
  };
  for file in files.flatten() {
    let name = file.file_name().to_string_lossy().to_string();
    if name != INDEX_FILE && !known.contains(name.as_str()) {
      let _ = std::fs::remove_file(file.path());
    }
  }
}

impl CacheStorage for FileCacheStorage {
  async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
    let mut names: Vec<String> = self.buckets().await?.read().await.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  async fn delete_bucket(&self, name: &str) -> Result<bool, StorageError> {
    let removed = self.buckets().await?.write().await.remove(name);
    match removed {
      Some(bucket) => {
        let dir = bucket.read().await.dir.clone();
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
          if e.kind() != std::io::ErrorKind::NotFound {
            return Err(e.into());
          }
        }
        tracing::info!("Deleted cache bucket {}", name);
        Ok(true)
      }
      None => Ok(false),
    }
  }

  async fn put(&self, bucket: &str, resource: CachedResource) -> Result<(), StorageError> {
    self.put_all(bucket, vec![resource]).await
  }

  async fn put_all(&self, bucket: &str, resources: Vec<CachedResource>) -> Result<(), StorageError> {
    let handle = match self.bucket(bucket, true).await? {
      Some(b) => b,
      None => return Err(StorageError::Unavailable(format!("bucket {} missing", bucket))),
    };

    let mut guard = handle.write().await;

    // Blobs first, so a failure leaves the index untouched.
    let mut staged: Vec<Entry> = Vec::with_capacity(resources.len());
    for res in resources {
      match Self::write_blob(&guard.dir, &res.payload).await {
        Ok(blob) => staged.push(Entry {
          key: res.request_key,
          status: res.status,
          content_type: res.content_type,
          stored_at: res.stored_at,
          size: res.payload.len() as u64,
          blob,
        }),
        Err(e) => {
          for entry in &staged {
            let _ = tokio::fs::remove_file(guard.dir.join(&entry.blob)).await;
          }
          return Err(e);
        }
      }
    }

    let previous = guard.entries.clone();
    let mut stale = Vec::new();
    for entry in staged.iter().cloned() {
      if let Some(old) = guard.upsert(entry) {
        stale.push(old);
      }
    }

    if let Err(e) = guard.persist().await {
      guard.entries = previous;
      for entry in &staged {
        let _ = tokio::fs::remove_file(guard.dir.join(&entry.blob)).await;
      }
      return Err(e);
    }

    for blob in stale {
      let _ = tokio::fs::remove_file(guard.dir.join(blob)).await;
    }
    Ok(())
  }

  async fn lookup(
    &self,
    bucket: Option<&str>,
    key: &RequestKey,
  ) -> Result<Option<CachedResource>, StorageError> {
    let candidates = match bucket {
      Some(name) => self.bucket(name, false).await?.into_iter().collect(),
      None => self.lookup_order().await?,
    };

    for handle in candidates {
      let guard = handle.read().await;
      let Some(i) = guard.position(key) else {
        continue;
      };
      let entry = &guard.entries[i];
      match tokio::fs::read(guard.dir.join(&entry.blob)).await {
        Ok(payload) => {
          return Ok(Some(CachedResource {
            request_key: entry.key.clone(),
            status: entry.status,
            payload: Bytes::from(payload),
            content_type: entry.content_type.clone(),
            stored_at: entry.stored_at,
          }))
        }
        Err(e) => {
          tracing::warn!("Cache blob for {} unreadable: {}", key, e);
        }
      }
    }
    Ok(None)
  }

  async fn keys(&self, bucket: &str) -> Result<Vec<RequestKey>, StorageError> {
    match self.bucket(bucket, false).await? {
      Some(handle) => Ok(handle.read().await.entries.iter().map(|e| e.key.clone()).collect()),
      None => Ok(Vec::new()),
    }
  }

  async fn report_usage(&self) -> Result<StorageEstimate, StorageError> {
    Ok(StorageEstimate {
      usage: dir_size(self.usage_root.clone()).await,
      quota: self.quota,
    })
  }
}
