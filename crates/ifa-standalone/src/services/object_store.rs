use ifa_core::error::{FailedRecord, StorageError};
use ifa_core::partition::{Partition, SCHEMA_VERSION};
use ifa_core::storage::ObjectStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::services::disk::write_atomic;

type Table = HashMap<String, Value>;

#[derive(Serialize, Deserialize)]
struct SchemaFile {
  version: u32,
}

struct Tables {
  dir: PathBuf,
  tables: HashMap<Partition, RwLock<Table>>,
}

impl Tables {
  fn table(&self, partition: Partition) -> &RwLock<Table> {
    // Every partition is created during open.
    &self.tables[&partition]
  }

  async fn persist(&self, partition: Partition, table: &Table) -> Result<(), StorageError> {
    let data = serde_json::to_vec(table).map_err(|e| StorageError::Corrupt {
      path: partition.name().into(),
      reason: e.to_string(),
    })?;
    write_atomic(&partition_path(&self.dir, partition), &data)
      .await
      .map_err(|e| StorageError::Unavailable(format!("write {}: {}", partition, e)))
  }
}

fn partition_path(dir: &Path, partition: Partition) -> PathBuf {
  dir.join(format!("{}.json", partition.name()))
}

/// Partitioned JSON record store, one file per partition under `dir`.
pub struct FileObjectStore {
  dir: PathBuf,
  tables: OnceCell<Result<Arc<Tables>, String>>,
}

impl FileObjectStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      tables: OnceCell::new(),
    }
  }

  /// The opened tables. An open failure is remembered and reported on every call.
  async fn tables(&self) -> Result<&Arc<Tables>, StorageError> {
    let opened = self
      .tables
      .get_or_init(|| async {
        match load(&self.dir).await {
          Ok(tables) => Ok(Arc::new(tables)),
          Err(e) => {
            tracing::error!("Object store unavailable at {}: {}", self.dir.display(), e);
            Err(e.to_string())
          }
        }
      })
      .await;
    opened
      .as_ref()
      .map_err(|e| StorageError::Unavailable(e.clone()))
  }
}

async fn load(dir: &Path) -> Result<Tables, StorageError> {
  tokio::fs::create_dir_all(dir).await?;

  let schema_path = dir.join("schema.json");
  let stored_version = match tokio::fs::read(&schema_path).await {
    Ok(data) => {
      let schema: SchemaFile = serde_json::from_slice(&data).map_err(|e| StorageError::Corrupt {
        path: schema_path.display().to_string(),
        reason: e.to_string(),
      })?;
      schema.version
    }
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
    Err(e) => return Err(e.into()),
  };

  if stored_version > SCHEMA_VERSION {
    return Err(StorageError::Unavailable(format!(
      "store schema v{} is newer than supported v{}",
      stored_version, SCHEMA_VERSION
    )));
  }

  let mut tables = HashMap::new();
  for partition in Partition::ALL {
    let path = partition_path(dir, partition);
    let table: Table = match tokio::fs::read(&path).await {
      Ok(data) => serde_json::from_slice(&data).map_err(|e| StorageError::Corrupt {
        path: path.display().to_string(),
        reason: e.to_string(),
      })?,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        write_atomic(&path, b"{}").await?;
        tracing::info!("Created partition {} (key: {})", partition, partition.key_path());
        Table::new()
      }
      Err(e) => return Err(e.into()),
    };
    tables.insert(partition, RwLock::new(table));
  }

  if stored_version < SCHEMA_VERSION {
    let schema = serde_json::to_vec(&SchemaFile {
      version: SCHEMA_VERSION,
    })
    .unwrap_or_default();
    write_atomic(&schema_path, &schema).await?;
    tracing::info!(
      "Object store schema upgraded from v{} to v{}",
      stored_version,
      SCHEMA_VERSION
    );
  }

  Ok(Tables {
    dir: dir.to_path_buf(),
    tables,
  })
}

impl ObjectStore for FileObjectStore {
  async fn open(&self) -> Result<(), StorageError> {
    self.tables().await.map(|_| ())
  }

  async fn put(&self, partition: Partition, records: Vec<Value>) -> Result<usize, StorageError> {
    let tables = self.tables().await?;

    let mut valid: Vec<(String, Value)> = Vec::with_capacity(records.len());
    let mut failed = Vec::new();
    for (index, record) in records.into_iter().enumerate() {
      match partition.primary_key(&record) {
        Ok(key) => valid.push((key, record)),
        Err(reason) => failed.push(FailedRecord {
          index,
          key: record.get(partition.key_path()).map(Value::to_string),
          reason,
        }),
      }
    }

    let written = valid.len();
    if written > 0 {
      let mut table = tables.table(partition).write().await;
      let mut next = table.clone();
      for (key, record) in valid {
        next.insert(key, record);
      }
      tables.persist(partition, &next).await?;
      *table = next;
    }

    if failed.is_empty() {
      Ok(written)
    } else {
      tracing::warn!(
        "{} of {} records rejected by partition {}",
        failed.len(),
        written + failed.len(),
        partition
      );
      Err(StorageError::PartialWrite { written, failed })
    }
  }

  async fn get(&self, partition: Partition, key: &str) -> Result<Option<Value>, StorageError> {
    let tables = self.tables().await?;
    let table = tables.table(partition).read().await;
    Ok(table.get(key).cloned())
  }

  async fn get_all(&self, partition: Partition) -> Result<Vec<Value>, StorageError> {
    let tables = self.tables().await?;
    let table = tables.table(partition).read().await;
    Ok(table.values().cloned().collect())
  }

  async fn count(&self, partition: Partition) -> Result<usize, StorageError> {
    let tables = self.tables().await?;
    let table = tables.table(partition).read().await;
    Ok(table.len())
  }

  async fn clear(&self, partition: Partition) -> Result<(), StorageError> {
    let tables = self.tables().await?;
    let mut table = tables.table(partition).write().await;
    tables.persist(partition, &Table::new()).await?;
    table.clear();
    Ok(())
  }

  async fn clear_all(&self) -> Result<(), StorageError> {
    for partition in Partition::ALL {
      self.clear(partition).await?;
    }
    tracing::info!("Cleared all offline data");
    Ok(())
  }
}
