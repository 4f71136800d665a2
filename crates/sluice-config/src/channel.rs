use serde::{Deserialize, Serialize};

/// How a channel delivers its items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
  /// FIFO queue: every item is consumed by exactly one firing.
  #[default]
  Queue,
  /// Singleton: the same value is read by every firing and never runs out.
  Value,
}

/// A source channel seeded by the pipeline before any process runs.
///
/// File items use the `{"$file": "path/to/file"}` convention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDef {
  pub name: String,
  #[serde(default)]
  pub kind: ChannelKind,
  #[serde(default)]
  pub items: Vec<serde_json::Value>,
}
