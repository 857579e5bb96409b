use serde::Serialize;
use thiserror::Error;

/// A failed network call. Recovered locally and never shown to the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NetworkError {
  #[error("network unreachable: {0}")]
  Unreachable(String),

  #[error("request timed out")]
  Timeout,

  #[error("body read failed: {0}")]
  Body(String),
}

/// A record that could not be written in a batch `put`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedRecord {
  pub index: usize,
  pub key: Option<String>,
  pub reason: String,
}

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("storage unavailable: {0}")]
  Unavailable(String),

  #[error("{} of {} records failed to write", .failed.len(), .written + .failed.len())]
  PartialWrite {
    written: usize,
    failed: Vec<FailedRecord>,
  },

  #[error("corrupt storage file {path}: {reason}")]
  Corrupt { path: String, reason: String },

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum BundleError {
  #[error("HTTP {status}")]
  Http { status: u16 },

  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error("decode error: {0}")]
  Decode(String),

  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error("card manifest not downloaded")]
  MissingManifest,

  #[error("none of {0} files could be fetched")]
  NothingFetched(usize),

  #[error("{failed} of {total} records failed to write")]
  RecordsRejected { failed: usize, total: usize },

  #[error("{0} is already downloading")]
  AlreadyDownloading(String),

  #[error("unknown bundle: {0}")]
  UnknownBundle(String),
}

impl BundleError {
  pub fn status_code(&self) -> Option<u16> {
    match self {
      BundleError::Http { status } => Some(*status),
      _ => None,
    }
  }
}

#[derive(Debug, Error)]
pub enum ProxyError {
  #[error("install failed for {url}: {reason}")]
  InstallFailed { url: String, reason: String },

  #[error("cannot {action} while {state}")]
  InvalidState { action: &'static str, state: String },

  #[error(transparent)]
  Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum AppError {
  #[error("{0}")]
  BadRequest(String),

  #[error("Not found: {0}")]
  NotFound(String),

  #[error("{0}")]
  Conflict(String),

  #[error("Service unavailable: {0}")]
  Unavailable(String),

  #[error("Internal server error")]
  Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
  pub fn status_code(&self) -> u16 {
    match self {
      AppError::BadRequest(_) => 400,
      AppError::NotFound(_) => 404,
      AppError::Conflict(_) => 409,
      AppError::Unavailable(_) => 503,
      AppError::Internal(_) => 500,
    }
  }
}

impl From<BundleError> for AppError {
  fn from(e: BundleError) -> Self {
    match e {
      BundleError::AlreadyDownloading(_) => AppError::Conflict(e.to_string()),
      BundleError::UnknownBundle(_) => AppError::NotFound(e.to_string()),
      other => AppError::Internal(Box::new(other)),
    }
  }
}

impl From<StorageError> for AppError {
  fn from(e: StorageError) -> Self {
    match e {
      StorageError::Unavailable(_) => AppError::Unavailable(e.to_string()),
      other => AppError::Internal(Box::new(other)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_write_message_counts_records() {
    let err = StorageError::PartialWrite {
      written: 2,
      failed: vec![
        FailedRecord {
          index: 1,
          key: None,
          reason: "missing primary key `id`".into(),
        },
        FailedRecord {
          index: 3,
          key: Some("x".into()),
          reason: "not an object".into(),
        },
      ],
    };
    assert_eq!(err.to_string(), "2 of 4 records failed to write");
  }

  #[test]
  fn test_app_error_status() {
    let e: AppError = BundleError::AlreadyDownloading("odu-database".into()).into();
    assert_eq!(e.status_code(), 409);
    let e: AppError = StorageError::Unavailable("quota".into()).into();
    assert_eq!(e.status_code(), 503);
    assert_eq!(BundleError::Http { status: 500 }.status_code(), Some(500));
  }
}
