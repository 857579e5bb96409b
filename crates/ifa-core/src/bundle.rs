use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::partition::Partition;

/// Card images without an explicit `image_url` live here.
pub const CARD_IMAGE_BASE: &str = "/static/images/cards/";

/// A downloadable collection of related resources persisted as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundleKind {
  OduDatabase,
  CardManifest,
  CardImages,
  AudioManifest,
  Learning,
  Complete,
}

/// How a finished download is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleShape {
  /// JSON envelope whose record arrays are written into partitions.
  Records,
  /// Individual binary files listed in the `cards` partition, cached one by one.
  CardImages,
}

impl BundleKind {
  pub const ALL: [BundleKind; 6] = [
    BundleKind::OduDatabase,
    BundleKind::CardManifest,
    BundleKind::CardImages,
    BundleKind::AudioManifest,
    BundleKind::Learning,
    BundleKind::Complete,
  ];

  /// Run in order by "download all essential resources".
  pub const ESSENTIAL: [BundleKind; 4] = [
    BundleKind::OduDatabase,
    BundleKind::CardManifest,
    BundleKind::CardImages,
    BundleKind::Learning,
  ];

  pub fn id(self) -> &'static str {
    match self {
      BundleKind::OduDatabase => "odu-database",
      BundleKind::CardManifest => "card-manifest",
      BundleKind::CardImages => "card-images",
      BundleKind::AudioManifest => "audio-manifest",
      BundleKind::Learning => "learning",
      BundleKind::Complete => "complete",
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      BundleKind::OduDatabase => "Odu database",
      BundleKind::CardManifest => "Odu card manifest",
      BundleKind::CardImages => "Odu card images",
      BundleKind::AudioManifest => "Audio library",
      BundleKind::Learning => "Learning content",
      BundleKind::Complete => "Complete offline package",
    }
  }

  pub fn endpoint(self) -> Option<&'static str> {
    match self {
      BundleKind::OduDatabase => Some("/api/offline/odu-database"),
      BundleKind::CardManifest => Some("/api/offline/odu-cards"),
      BundleKind::CardImages => None,
      BundleKind::AudioManifest => Some("/api/offline/audio-files"),
      BundleKind::Learning => Some("/api/offline/learning-content"),
      BundleKind::Complete => Some("/api/offline/complete-package"),
    }
  }

  pub fn shape(self) -> BundleShape {
    match self {
      BundleKind::CardImages => BundleShape::CardImages,
      _ => BundleShape::Records,
    }
  }
}

impl fmt::Display for BundleKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.id())
  }
}

impl FromStr for BundleKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    BundleKind::ALL
      .into_iter()
      .find(|b| b.id() == s)
      .ok_or_else(|| s.to_string())
  }
}

/// Response body of every bulk endpoint. Which arrays are present depends on the bundle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleEnvelope {
  #[serde(default)]
  pub version: Value,
  #[serde(default)]
  pub timestamp: Value,
  pub data: Option<Vec<Value>>,
  pub cards: Option<Vec<Value>>,
  pub audio_files: Option<Vec<Value>>,
  pub modules: Option<Vec<Value>>,
}

impl BundleEnvelope {
  pub fn decode(bytes: &[u8]) -> Result<Self, String> {
    serde_json::from_slice(bytes).map_err(|e| e.to_string())
  }

  /// Split the envelope into per-partition record sets for `kind`.
  ///
  /// Single-category bundles require their array to be present. The complete
  /// package takes whichever arrays exist but must carry at least one.
  pub fn into_partitions(self, kind: BundleKind) -> Result<Vec<(Partition, Vec<Value>)>, String> {
    let required = |arr: Option<Vec<Value>>, field: &str| {
      arr.ok_or_else(|| format!("{} envelope is missing `{}`", kind, field))
    };
    match kind {
      BundleKind::OduDatabase => Ok(vec![(Partition::Odus, required(self.data, "data")?)]),
      BundleKind::CardManifest => Ok(vec![(Partition::Cards, required(self.cards, "cards")?)]),
      BundleKind::AudioManifest => Ok(vec![(
        Partition::Audio,
        required(self.audio_files, "audio_files")?,
      )]),
      BundleKind::Learning => Ok(vec![(
        Partition::Learning,
        required(self.modules, "modules")?,
      )]),
      BundleKind::Complete => {
        let sets: Vec<(Partition, Vec<Value>)> = [
          (Partition::Odus, self.data),
          (Partition::Cards, self.cards),
          (Partition::Audio, self.audio_files),
          (Partition::Learning, self.modules),
        ]
        .into_iter()
        .filter_map(|(p, arr)| arr.map(|records| (p, records)))
        .collect();
        if sets.is_empty() {
          return Err("complete package contains no record arrays".into());
        }
        Ok(sets)
      }
      BundleKind::CardImages => Err("card images are not a record bundle".into()),
    }
  }
}

/// The `metadata` record marking `category` as available offline.
pub fn metadata_record(
  category: &str,
  version: &Value,
  timestamp: &Value,
  count: usize,
  downloaded_at: u64,
) -> Value {
  json!({
    "type": category,
    "version": version,
    "timestamp": timestamp,
    "count": count,
    "downloaded_at": downloaded_at,
  })
}

/// Where to fetch the image for one card manifest entry.
pub fn card_image_url(card: &Value) -> Option<String> {
  if let Some(url) = card.get("image_url").and_then(Value::as_str) {
    if !url.is_empty() {
      return Some(url.to_string());
    }
  }
  card
    .get("filename")
    .and_then(Value::as_str)
    .filter(|f| !f.is_empty() && !f.contains(".."))
    .map(|f| format!("{}{}", CARD_IMAGE_BASE, f.trim_start_matches('/')))
}
