//! One-way command channel from the main context into the proxy.
//!
//! Messages are handled one at a time, in arrival order, by a single task.

use ifa_core::control::{CacheResourceData, ControlMessage, ControlReply};
use ifa_core::storage::CacheStorage;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::services::fetcher::Fetch;
use crate::services::proxy::Proxy;

pub struct ControlEnvelope {
  message: ControlMessage,
  tag: String,
  reply: Option<oneshot::Sender<ControlReply>>,
}

/// Sending half of the control channel.
#[derive(Clone)]
pub struct ControlHandle {
  tx: mpsc::Sender<ControlEnvelope>,
}

pub fn channel(capacity: usize) -> (ControlHandle, mpsc::Receiver<ControlEnvelope>) {
  let (tx, rx) = mpsc::channel(capacity);
  (ControlHandle { tx }, rx)
}

impl ControlHandle {
  /// Fire-and-forget.
  #[cfg(test)]
  pub async fn post(&self, raw: &Value) -> Result<(), String> {
    let (message, tag) = ControlMessage::parse(raw)?;
    self.send(message, tag, None).await
  }

  /// Send a raw message and wait for the reply.
  #[cfg(test)]
  pub async fn request(&self, raw: &Value) -> Result<ControlReply, String> {
    let (message, tag) = ControlMessage::parse(raw)?;
    self.ask(message, tag).await
  }

  /// Send an already parsed message and wait for the reply.
  pub async fn ask(&self, message: ControlMessage, tag: String) -> Result<ControlReply, String> {
    let (tx, rx) = oneshot::channel();
    self.send(message, tag, Some(tx)).await?;
    rx.await.map_err(|_| "control loop dropped the reply".to_string())
  }

  /// Seed one resource and wait until it is stored.
  pub async fn cache_resource(&self, data: CacheResourceData) -> Result<(), String> {
    let (tx, rx) = oneshot::channel();
    self
      .send(
        ControlMessage::CacheResource(data),
        "CACHE_RESOURCE".into(),
        Some(tx),
      )
      .await?;
    match rx.await {
      Ok(ControlReply::Done { success: true }) => Ok(()),
      Ok(ControlReply::Error { error }) => Err(error),
      Ok(_) => Err("resource was not cached".into()),
      Err(_) => Err("control loop dropped the reply".into()),
    }
  }

  async fn send(
    &self,
    message: ControlMessage,
    tag: String,
    reply: Option<oneshot::Sender<ControlReply>>,
  ) -> Result<(), String> {
    self
      .tx
      .send(ControlEnvelope {
        message,
        tag,
        reply,
      })
      .await
      .map_err(|_| "control channel closed".to_string())
  }
}

/// Drain the channel until every handle is dropped.
pub async fn run<F: Fetch, C: CacheStorage + 'static>(
  proxy: Arc<Proxy<F, C>>,
  mut rx: mpsc::Receiver<ControlEnvelope>,
) {
  while let Some(envelope) = rx.recv().await {
    let reply = dispatch(&proxy, envelope.message, &envelope.tag).await;
    if let Some(tx) = envelope.reply {
      let _ = tx.send(reply);
    }
  }
  tracing::debug!("Control channel closed");
}

async fn dispatch<F: Fetch, C: CacheStorage>(
  proxy: &Proxy<F, C>,
  message: ControlMessage,
  tag: &str,
) -> ControlReply {
  match message {
    ControlMessage::CacheResource(data) => match proxy.seed(&data).await {
      Ok(key) => {
        tracing::debug!("Seeded {}", key);
        ControlReply::Done { success: true }
      }
      Err(e) => {
        tracing::warn!("CACHE_RESOURCE for {} failed: {}", data.url, e);
        ControlReply::Error { error: e }
      }
    },
    ControlMessage::ClearCache => match proxy.clear_buckets().await {
      Ok(n) => {
        tracing::info!("Cleared {} cache buckets", n);
        ControlReply::Done { success: true }
      }
      Err(e) => {
        tracing::warn!("CLEAR_CACHE failed: {}", e);
        ControlReply::Error {
          error: e.to_string(),
        }
      }
    },
    ControlMessage::GetCacheStatus => match proxy.cache_status().await {
      Ok(report) => ControlReply::Status(report),
      Err(e) => ControlReply::Error {
        error: e.to_string(),
      },
    },
    ControlMessage::Unknown => {
      tracing::warn!("Ignoring unknown control message {}", tag);
      ControlReply::Ignored { ignored: true }
    }
  }
}
