use serde::{Deserialize, Serialize};

use crate::enums::ErrorStrategy;
use crate::input::InputDef;
use crate::output::OutputDef;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDef {
  pub name: String,
  #[serde(default)]
  pub inputs: Vec<InputDef>,
  #[serde(default)]
  pub outputs: Vec<OutputDef>,
  #[serde(flatten)]
  pub body: BodyDef,
  /// Upper bound on concurrent firings. Ignored when a shared input exists.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub max_forks: Option<usize>,
  #[serde(default = "default_cache")]
  pub cache: bool,
  #[serde(default)]
  pub error_strategy: ErrorStrategy,
}

/// The body of work a process runs for every firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyDef {
  /// Script template, rendered against the task context.
  Script(String),
  /// Structured body handed to the executor as-is.
  Exec(String),
}

fn default_cache() -> bool {
  true
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::input::InputType;
  use serde_json::json;

  #[test]
  fn test_deserialize_process() {
    let def: ProcessDef = serde_json::from_value(json!({
      "name": "align",
      "inputs": [
        { "name": "reads", "from": "reads", "type": "each_file", "pattern": "r_*.fq" },
        { "name": "db", "from": "db", "type": "shared_val", "into": "db_out" }
      ],
      "outputs": [
        { "type": "file", "pattern": "*.bam", "mode": "flatten" }
      ],
      "script": "align {{ reads }} {{ db }}",
      "max_forks": 4
    }))
    .unwrap();

    assert_eq!(def.name, "align");
    assert_eq!(
      def.inputs[0].input_type,
      InputType::EachFile {
        pattern: Some("r_*.fq".to_string())
      }
    );
    assert_eq!(
      def.inputs[1].input_type,
      InputType::SharedVal {
        into: Some("db_out".to_string())
      }
    );
    assert_eq!(def.body, BodyDef::Script("align {{ reads }} {{ db }}".to_string()));
    assert_eq!(def.max_forks, Some(4));
    assert!(def.cache);
    assert_eq!(def.error_strategy, ErrorStrategy::Terminate);
  }

  #[test]
  fn test_unknown_input_type() {
    let def: ProcessDef = serde_json::from_value(json!({
      "name": "p",
      "inputs": [{ "name": "x", "from": "xs", "type": "tuple" }],
      "exec": "native"
    }))
    .unwrap();

    assert_eq!(def.inputs[0].input_type, InputType::Unsupported);
    assert_eq!(def.body, BodyDef::Exec("native".to_string()));
  }

  #[test]
  fn test_set_output() {
    let def: ProcessDef = serde_json::from_value(json!({
      "name": "p",
      "outputs": [{
        "type": "set",
        "into": "pairs",
        "mode": "combine",
        "outputs": [
          { "type": "val", "name": "id" },
          { "type": "file", "pattern": "*.txt" }
        ]
      }],
      "script": "touch a.txt",
      "cache": false,
      "error_strategy": "ignore"
    }))
    .unwrap();

    match &def.outputs[0] {
      OutputDef::Set { outputs, into, mode } => {
        assert_eq!(outputs.len(), 2);
        assert_eq!(into.as_deref(), Some("pairs"));
        assert_eq!(mode.as_deref(), Some("combine"));
      }
      other => panic!("expected set output, got {:?}", other),
    }
    assert!(!def.cache);
    assert_eq!(def.error_strategy, ErrorStrategy::Ignore);
  }
}
