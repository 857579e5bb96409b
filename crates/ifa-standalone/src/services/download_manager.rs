use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use ifa_core::bundle::{card_image_url, metadata_record, BundleEnvelope, BundleKind, BundleShape};
use ifa_core::config::Config;
use ifa_core::control::CacheResourceData;
use ifa_core::error::{BundleError, NetworkError, StorageError};
use ifa_core::partition::{OfflineAvailability, Partition};
use ifa_core::storage::ObjectStore;
use ifa_core::types::{unix_now, DownloadTask, TaskStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::services::control_channel::ControlHandle;
use crate::services::fetcher::Fetch;

/// Runs bundle downloads into the object store and the offline bucket, and
/// publishes task snapshots as they change.
pub struct DownloadManager<F, S> {
  fetcher: Arc<F>,
  store: Arc<S>,
  control: ControlHandle,
  tasks: RwLock<HashMap<BundleKind, DownloadTask>>,
  progress_tx: broadcast::Sender<DownloadTask>,
  write_chunk_size: usize,
  image_concurrency: usize,
}

impl<F: Fetch, S: ObjectStore + 'static> DownloadManager<F, S> {
  pub fn new(config: &Config, fetcher: Arc<F>, store: Arc<S>, control: ControlHandle) -> Self {
    let (progress_tx, _) = broadcast::channel(256);
    Self {
      fetcher,
      store,
      control,
      tasks: RwLock::new(HashMap::new()),
      progress_tx,
      write_chunk_size: config.write_chunk_size.max(1),
      image_concurrency: config.image_concurrency.max(1),
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<DownloadTask> {
    self.progress_tx.subscribe()
  }

  pub async fn tasks(&self) -> Vec<DownloadTask> {
    let tasks = self.tasks.read().await;
    let mut all: Vec<DownloadTask> = tasks.values().cloned().collect();
    all.sort_by(|a, b| a.resource_id.cmp(&b.resource_id));
    all
  }

  pub async fn task(&self, kind: BundleKind) -> Option<DownloadTask> {
    self.tasks.read().await.get(&kind).cloned()
  }

  /// Register a fresh task for `kind`, replacing a finished one.
  async fn begin(&self, kind: BundleKind) -> Result<DownloadTask, BundleError> {
    let mut tasks = self.tasks.write().await;
    if matches!(tasks.get(&kind), Some(t) if t.status == TaskStatus::Downloading) {
      return Err(BundleError::AlreadyDownloading(kind.id().to_string()));
    }
    let mut task = DownloadTask::new(kind.id(), kind.label());
    task.start();
    tasks.insert(kind, task.clone());
    let _ = self.progress_tx.send(task.clone());
    tracing::info!("Downloading {}", kind.label());
    Ok(task)
  }

  /// Download one bundle to completion and return its final snapshot.
  pub async fn download(&self, kind: BundleKind) -> Result<DownloadTask, BundleError> {
    self.begin(kind).await?;
    Ok(self.execute(kind).await)
  }

  /// Start one bundle in the background. Returns the initial snapshot.
  pub async fn spawn(self: &Arc<Self>, kind: BundleKind) -> Result<DownloadTask, BundleError> {
    let task = self.begin(kind).await?;
    let manager = self.clone();
    tokio::spawn(async move {
      manager.execute(kind).await;
    });
    Ok(task)
  }

  /// Run the essential bundles one after another. A failure does not stop the
  /// bundles after it.
  pub async fn download_all_essential(&self) -> Vec<DownloadTask> {
    let mut reports = Vec::with_capacity(BundleKind::ESSENTIAL.len());
    for kind in BundleKind::ESSENTIAL {
      match self.download(kind).await {
        Ok(task) => reports.push(task),
        Err(e) => {
          tracing::warn!("Skipping {}: {}", kind, e);
          if let Some(task) = self.task(kind).await {
            reports.push(task);
          }
        }
      }
    }
    let completed = reports
      .iter()
      .filter(|t| t.status == TaskStatus::Completed)
      .count();
    tracing::info!(
      "Essential download finished: {} of {} bundles completed",
      completed,
      reports.len()
    );
    reports
  }

  async fn execute(&self, kind: BundleKind) -> DownloadTask {
    let result = match kind.shape() {
      BundleShape::Records => self.fetch_records(kind).await,
      BundleShape::CardImages => self.fetch_card_images(kind).await,
    };

    let snapshot = match result {
      Ok(()) => self.update(kind, |t| t.complete()).await,
      Err(e) => {
        tracing::error!("Download of {} failed: {}", kind.label(), e);
        self
          .update(kind, |t| t.fail(e.to_string(), e.status_code()))
          .await
      }
    };
    snapshot.unwrap_or_else(|| DownloadTask::new(kind.id(), kind.label()))
  }

  async fn fetch_records(&self, kind: BundleKind) -> Result<(), BundleError> {
    let endpoint = kind
      .endpoint()
      .ok_or_else(|| BundleError::UnknownBundle(kind.id().to_string()))?;
    let resp = self.fetcher.fetch_stream(endpoint).await?;
    if !resp.is_success() {
      return Err(BundleError::Http {
        status: resp.status,
      });
    }
    self.update(kind, |t| t.set_total(resp.content_length)).await;

    let body = self.drain(kind, resp.body).await?;
    let envelope = BundleEnvelope::decode(&body).map_err(BundleError::Decode)?;
    let version = envelope.version.clone();
    let timestamp = envelope.timestamp.clone();

    let mut total = 0;
    let mut rejected = Vec::new();
    for (partition, records) in envelope.into_partitions(kind).map_err(BundleError::Decode)? {
      total += records.len();
      let (written, failed) = self.write_chunked(partition, records).await?;
      // A partition whose every record was rejected is not available.
      if written > 0 || failed.is_empty() {
        let meta = metadata_record(partition.name(), &version, &timestamp, written, unix_now());
        self.store.put(Partition::Metadata, vec![meta]).await?;
      }
      tracing::info!("Stored {} {} records", written, partition);
      rejected.extend(failed);
    }

    if rejected.is_empty() {
      return Ok(());
    }
    let failed = rejected.len();
    self.update(kind, |t| t.failed_items = rejected).await;
    Err(BundleError::RecordsRejected { failed, total })
  }

  /// Write `records` in chunks, carrying on past rejected records. Returns the
  /// number written and a label for each rejected record.
  async fn write_chunked(
    &self,
    partition: Partition,
    records: Vec<Value>,
  ) -> Result<(usize, Vec<String>), StorageError> {
    let mut written = 0;
    let mut rejected = Vec::new();
    for (n, chunk) in records.chunks(self.write_chunk_size).enumerate() {
      let offset = n * self.write_chunk_size;
      match self.store.put(partition, chunk.to_vec()).await {
        Ok(count) => written += count,
        Err(StorageError::PartialWrite { written: count, failed }) => {
          written += count;
          for record in failed {
            tracing::warn!(
              "Rejected {} record #{}: {}",
              partition,
              offset + record.index,
              record.reason
            );
            rejected.push(match record.key {
              Some(key) => format!("{}/{}", partition, key),
              None => format!("{}#{}", partition, offset + record.index),
            });
          }
        }
        Err(e) => return Err(e),
      }
    }
    Ok((written, rejected))
  }

  async fn fetch_card_images(&self, kind: BundleKind) -> Result<(), BundleError> {
    let cards = self.store.get_all(Partition::Cards).await?;
    if cards.is_empty() {
      return Err(BundleError::MissingManifest);
    }

    let mut failed = Vec::new();
    let mut urls = Vec::with_capacity(cards.len());
    for card in &cards {
      match card_image_url(card) {
        Some(url) => urls.push(url),
        None => failed.push(
          Partition::Cards
            .primary_key(card)
            .unwrap_or_else(|_| card.to_string()),
        ),
      }
    }

    let total = cards.len();
    let fetches: Vec<_> = urls
      .into_iter()
      .map(|url| self.fetch_image(kind, url))
      .collect();
    let results: Vec<(String, Result<(), String>)> = futures_util::stream::iter(fetches)
      .buffer_unordered(self.image_concurrency)
      .collect()
      .await;

    let mut cached = 0;
    for (url, outcome) in results {
      match outcome {
        Ok(()) => cached += 1,
        Err(e) => {
          tracing::warn!("Card image {} failed: {}", url, e);
          failed.push(url);
        }
      }
    }

    failed.sort();
    self.update(kind, |t| t.failed_items = failed).await;
    if cached == 0 {
      return Err(BundleError::NothingFetched(total));
    }

    let meta = metadata_record(kind.id(), &Value::Null, &Value::Null, cached, unix_now());
    self.store.put(Partition::Metadata, vec![meta]).await?;
    tracing::info!("Cached {} of {} card images", cached, total);
    Ok(())
  }

  async fn fetch_image(&self, kind: BundleKind, url: String) -> (String, Result<(), String>) {
    let outcome = self.cache_image(kind, &url).await;
    (url, outcome)
  }

  async fn cache_image(&self, kind: BundleKind, url: &str) -> Result<(), String> {
    let resp = self.fetcher.fetch_stream(url).await.map_err(|e| e.to_string())?;
    if !resp.is_success() {
      return Err(format!("HTTP {}", resp.status));
    }
    let content_type = resp.content_type;
    let body = self.drain(kind, resp.body).await.map_err(|e| e.to_string())?;
    self
      .control
      .cache_resource(CacheResourceData::binary(url, &body, &content_type))
      .await
  }

  /// Collect a streamed body, advancing the task with every chunk.
  async fn drain(
    &self,
    kind: BundleKind,
    mut body: BoxStream<'static, Result<Bytes, NetworkError>>,
  ) -> Result<Bytes, NetworkError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
      let chunk = chunk?;
      buf.extend_from_slice(&chunk);
      self.update(kind, |t| t.advance(chunk.len() as u64)).await;
    }
    Ok(buf.freeze())
  }

  /// Apply `f` to the task and publish the result.
  async fn update(&self, kind: BundleKind, f: impl FnOnce(&mut DownloadTask)) -> Option<DownloadTask> {
    let mut tasks = self.tasks.write().await;
    let task = tasks.get_mut(&kind)?;
    f(task);
    let snapshot = task.clone();
    let _ = self.progress_tx.send(snapshot.clone());
    Some(snapshot)
  }

  pub async fn availability(&self) -> Result<OfflineAvailability, StorageError> {
    let mut snapshot = OfflineAvailability::default();
    for category in Partition::CONTENT {
      snapshot.set(category, self.is_data_available(category).await?);
    }
    Ok(snapshot)
  }

  pub async fn is_data_available(&self, category: Partition) -> Result<bool, StorageError> {
    Ok(
      self
        .store
        .get(Partition::Metadata, category.name())
        .await?
        .is_some(),
    )
  }

  /// Truncate every partition. Cached responses are left alone.
  pub async fn clear_offline_data(&self) -> Result<(), StorageError> {
    self.store.clear_all().await
  }
}
