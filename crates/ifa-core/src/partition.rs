use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Bump when a partition is added. `open()` creates whatever is missing.
pub const SCHEMA_VERSION: u32 = 2;

/// A named section of the object store with one declared primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
  Odus,
  Cards,
  Audio,
  Learning,
  Metadata,
}

impl Partition {
  pub const ALL: [Partition; 5] = [
    Partition::Odus,
    Partition::Cards,
    Partition::Audio,
    Partition::Learning,
    Partition::Metadata,
  ];

  /// Content partitions whose availability is tracked through `metadata`.
  pub const CONTENT: [Partition; 4] = [
    Partition::Odus,
    Partition::Cards,
    Partition::Audio,
    Partition::Learning,
  ];

  pub fn name(self) -> &'static str {
    match self {
      Partition::Odus => "odus",
      Partition::Cards => "cards",
      Partition::Audio => "audio",
      Partition::Learning => "learning",
      Partition::Metadata => "metadata",
    }
  }

  pub fn key_path(self) -> &'static str {
    match self {
      Partition::Metadata => "type",
      _ => "id",
    }
  }

  /// Extract the primary key of `record`. Integer keys are normalised to decimal strings.
  pub fn primary_key(self, record: &Value) -> Result<String, String> {
    let obj = record
      .as_object()
      .ok_or_else(|| "record is not a JSON object".to_string())?;
    match obj.get(self.key_path()) {
      Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
      Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
      Some(_) => Err(format!(
        "primary key `{}` must be a non-empty string or an integer",
        self.key_path()
      )),
      None => Err(format!("missing primary key `{}`", self.key_path())),
    }
  }
}

impl fmt::Display for Partition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Partition {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Partition::ALL
      .into_iter()
      .find(|p| p.name() == s)
      .ok_or_else(|| format!("unknown partition: {}", s))
  }
}

/// Which content categories have a completed download recorded in `metadata`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineAvailability {
  pub odus: bool,
  pub cards: bool,
  pub audio: bool,
  pub learning: bool,
}

impl OfflineAvailability {
  pub fn set(&mut self, category: Partition, available: bool) {
    match category {
      Partition::Odus => self.odus = available,
      Partition::Cards => self.cards = available,
      Partition::Audio => self.audio = available,
      Partition::Learning => self.learning = available,
      Partition::Metadata => {}
    }
  }

  pub fn any(&self) -> bool {
    self.odus || self.cards || self.audio || self.learning
  }
}
