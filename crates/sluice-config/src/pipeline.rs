use serde::{Deserialize, Serialize};

use crate::channel::ChannelDef;
use crate::process::ProcessDef;

/// A full pipeline: seeded source channels plus the processes wired by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
  pub name: String,
  /// Pipeline-wide parameters, visible to every process body after its own
  /// context bindings.
  #[serde(default)]
  pub params: serde_json::Map<String, serde_json::Value>,
  #[serde(default)]
  pub channels: Vec<ChannelDef>,
  pub processes: Vec<ProcessDef>,
}
