use sluice_config::{BodyDef, ErrorStrategy, ProcessDef};

use crate::error::DeclarationError;
use crate::param::{InputParam, OutputParam, build_inputs, build_outputs};

/// The body of work run by every firing.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessBody {
  /// Text template rendered against the task context.
  Template(String),
  /// Structured body; its source is used verbatim as the task script.
  Native { source: String },
}

impl ProcessBody {
  pub fn is_template(&self) -> bool {
    matches!(self, ProcessBody::Template(_))
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
  pub max_forks: Option<usize>,
  pub cache: bool,
  pub error_strategy: ErrorStrategy,
  /// Outer scope for body lookups; task bindings shadow these.
  pub defaults: serde_json::Map<String, serde_json::Value>,
}

impl Default for ProcessConfig {
  fn default() -> Self {
    Self {
      max_forks: None,
      cache: true,
      error_strategy: ErrorStrategy::default(),
      defaults: serde_json::Map::new(),
    }
  }
}

/// A validated process, ready to be installed as an operator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessDefinition {
  pub name: String,
  pub inputs: Vec<InputParam>,
  pub outputs: Vec<OutputParam>,
  pub body: ProcessBody,
  pub config: ProcessConfig,
}

impl ProcessDefinition {
  /// Validate a declaration.
  pub fn from_def(def: &ProcessDef) -> Result<Self, DeclarationError> {
    let inputs = build_inputs(&def.name, &def.inputs)?;
    let outputs = build_outputs(&def.name, &def.outputs)?;

    let body = match &def.body {
      BodyDef::Script(template) => ProcessBody::Template(template.clone()),
      BodyDef::Exec(source) => ProcessBody::Native {
        source: source.clone(),
      },
    };

    Ok(Self {
      name: def.name.clone(),
      inputs,
      outputs,
      body,
      config: ProcessConfig {
        max_forks: def.max_forks,
        cache: def.cache,
        error_strategy: def.error_strategy,
        defaults: serde_json::Map::new(),
      },
    })
  }

  /// Set the outer scope visible to the body.
  pub fn with_defaults(mut self, defaults: serde_json::Map<String, serde_json::Value>) -> Self {
    self.config.defaults = defaults;
    self
  }

  pub fn has_shared_inputs(&self) -> bool {
    self.inputs.iter().any(InputParam::is_shared)
  }

  pub fn has_each_inputs(&self) -> bool {
    self.inputs.iter().any(InputParam::is_each)
  }

  /// Tuple positions of the "each" inputs, in declaration order.
  pub fn each_positions(&self) -> Vec<usize> {
    self
      .inputs
      .iter()
      .filter(|p| p.is_each())
      .map(|p| p.index)
      .collect()
  }

  pub fn shared_inputs(&self) -> impl Iterator<Item = &InputParam> {
    self.inputs.iter().filter(|p| p.is_shared())
  }

  pub fn get_input(&self, name: &str) -> Option<&InputParam> {
    self.inputs.iter().find(|p| p.name == name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::param::InputKind;
  use serde_json::json;

  fn parse(value: serde_json::Value) -> ProcessDef {
    serde_json::from_value(value).unwrap()
  }

  #[test]
  fn test_from_def() {
    let def = parse(json!({
      "name": "count",
      "inputs": [
        { "name": "x", "from": "xs", "type": "each" },
        { "name": "y", "from": "ys", "type": "val" },
        { "name": "z", "from": "zs", "type": "each_file", "pattern": "in_*.txt" }
      ],
      "outputs": [{ "type": "stdout", "into": "counts" }],
      "script": "wc -l {{ z }}"
    }));

    let process = ProcessDefinition::from_def(&def).unwrap();

    assert_eq!(process.name, "count");
    assert!(process.has_each_inputs());
    assert!(!process.has_shared_inputs());
    assert_eq!(process.each_positions(), vec![0, 2]);
    assert_eq!(
      process.get_input("z").unwrap().kind,
      InputKind::EachFile {
        pattern: Some("in_*.txt".to_string())
      }
    );
    assert!(process.body.is_template());
    assert_eq!(process.outputs[0].channel_name(), "counts");
  }

  #[test]
  fn test_invalid_mode_fails_declaration() {
    let def = parse(json!({
      "name": "p",
      "outputs": [{ "type": "val", "name": "x", "mode": "sideways" }],
      "script": "echo"
    }));

    let err = ProcessDefinition::from_def(&def).unwrap_err();
    assert!(matches!(err, DeclarationError::InvalidOutputMode { .. }));
  }

  #[test]
  fn test_defaults_and_native_body() {
    let def = parse(json!({
      "name": "p",
      "inputs": [{ "name": "s", "from": "seed", "type": "shared_val", "into": "final" }],
      "exec": "builtin:identity"
    }));

    let mut defaults = serde_json::Map::new();
    defaults.insert("genome".to_string(), json!("hg38"));

    let process = ProcessDefinition::from_def(&def).unwrap().with_defaults(defaults);
    assert!(process.has_shared_inputs());
    assert_eq!(process.shared_inputs().count(), 1);
    assert_eq!(process.config.defaults["genome"], "hg38");
    assert_eq!(
      process.body,
      ProcessBody::Native {
        source: "builtin:identity".to_string()
      }
    );
  }
}
