use serde_json::Value;

use crate::error::StorageError;
use crate::partition::Partition;
use crate::types::{CachedResource, RequestKey, StorageEstimate};

/// Persistent structured store of named partitions (platform-specific implementation).
pub trait ObjectStore: Send + Sync {
  /// Initialise on first use. Safe to call repeatedly and concurrently.
  fn open(&self) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

  /// Upsert every record. Records without a usable primary key are reported in
  /// `StorageError::PartialWrite`; the others are still written.
  fn put(
    &self,
    partition: Partition,
    records: Vec<Value>,
  ) -> impl std::future::Future<Output = Result<usize, StorageError>> + Send;

  fn get(
    &self,
    partition: Partition,
    key: &str,
  ) -> impl std::future::Future<Output = Result<Option<Value>, StorageError>> + Send;

  /// All records of a partition, in no particular order.
  fn get_all(
    &self,
    partition: Partition,
  ) -> impl std::future::Future<Output = Result<Vec<Value>, StorageError>> + Send;

  fn count(
    &self,
    partition: Partition,
  ) -> impl std::future::Future<Output = Result<usize, StorageError>> + Send;

  fn clear(
    &self,
    partition: Partition,
  ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

  fn clear_all(&self) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;
}

/// Named buckets of cached responses keyed by request identity.
pub trait CacheStorage: Send + Sync {
  fn list_buckets(
    &self,
  ) -> impl std::future::Future<Output = Result<Vec<String>, StorageError>> + Send;

  /// Delete a bucket. Returns true if it existed.
  fn delete_bucket(
    &self,
    name: &str,
  ) -> impl std::future::Future<Output = Result<bool, StorageError>> + Send;

  /// Store one resource, creating the bucket if needed. Replaces any entry with the same key.
  fn put(
    &self,
    bucket: &str,
    resource: CachedResource,
  ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

  /// Store a batch so that either all entries become visible or none do.
  fn put_all(
    &self,
    bucket: &str,
    resources: Vec<CachedResource>,
  ) -> impl std::future::Future<Output = Result<(), StorageError>> + Send;

  /// Look up a key in one bucket, or in every bucket when `bucket` is `None`.
  fn lookup(
    &self,
    bucket: Option<&str>,
    key: &RequestKey,
  ) -> impl std::future::Future<Output = Result<Option<CachedResource>, StorageError>> + Send;

  /// Keys of a bucket in insertion order.
  fn keys(
    &self,
    bucket: &str,
  ) -> impl std::future::Future<Output = Result<Vec<RequestKey>, StorageError>> + Send;

  fn report_usage(
    &self,
  ) -> impl std::future::Future<Output = Result<StorageEstimate, StorageError>> + Send;
}
