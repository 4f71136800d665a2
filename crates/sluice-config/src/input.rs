//! Input parameter declarations.
//!
//! Every input names the channel it reads from (`from`) and declares how the
//! value it receives is bound into the task.
//!
//! # Examples
//!
//! ```json
//! [
//!   { "name": "sample", "from": "samples", "type": "file", "pattern": "sample_*.fa" },
//!   { "name": "k", "from": "kmers", "type": "each" },
//!   { "name": "db", "from": "db", "type": "shared_val", "into": "db_out" }
//! ]
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDef {
  pub name: String,
  /// Name of the channel feeding this input.
  pub from: String,
  #[serde(flatten)]
  pub input_type: InputType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputType {
  Val,
  File {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
  },
  /// A collection expanded into one task per element.
  Each,
  EachFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
  },
  /// Captured on the first firing and reused by every later one.
  SharedVal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    into: Option<String>,
  },
  SharedFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    into: Option<String>,
  },
  Stdin,
  Env,
  /// Any type tag this version does not know about.
  #[serde(other)]
  Unsupported,
}
