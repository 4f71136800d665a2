use std::collections::HashSet;

use sluice_config::{InputDef, InputType};

use crate::error::DeclarationError;
use crate::item::Item;

/// An input parameter: where its value comes from and how it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct InputParam {
  pub name: String,
  /// Position of this param in the firing tuple.
  pub index: usize,
  /// Channel feeding this param.
  pub source: String,
  pub kind: InputKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputKind {
  Value,
  File { pattern: Option<String> },
  EachValue,
  EachFile { pattern: Option<String> },
  SharedValue { into: Option<String> },
  SharedFile {
    pattern: Option<String>,
    into: Option<String>,
  },
  StdIn,
  Env,
  Unsupported,
}

impl InputParam {
  /// Whether this param is expanded combinatorially before scheduling.
  pub fn is_each(&self) -> bool {
    matches!(self.kind, InputKind::EachValue | InputKind::EachFile { .. })
  }

  pub fn is_shared(&self) -> bool {
    matches!(
      self.kind,
      InputKind::SharedValue { .. } | InputKind::SharedFile { .. }
    )
  }

  /// Whether this firing captures the shared value (the first one does).
  pub fn captures_on(&self, task_index: u64) -> bool {
    self.is_shared() && task_index == 1
  }

  /// Channel a shared param publishes its final value to.
  pub fn into_target(&self) -> Option<&str> {
    match &self.kind {
      InputKind::SharedValue { into } | InputKind::SharedFile { into, .. } => into.as_deref(),
      _ => None,
    }
  }

  pub fn file_pattern(&self) -> Option<&str> {
    match &self.kind {
      InputKind::File { pattern }
      | InputKind::EachFile { pattern }
      | InputKind::SharedFile { pattern, .. } => pattern.as_deref(),
      _ => None,
    }
  }

  /// This param's raw value in a firing tuple.
  pub fn extract<'a>(&self, tuple: &'a [Item]) -> Option<&'a Item> {
    tuple.get(self.index)
  }
}

pub(crate) fn build_inputs(
  process: &str,
  defs: &[InputDef],
) -> Result<Vec<InputParam>, DeclarationError> {
  let mut seen = HashSet::new();
  let mut params = Vec::with_capacity(defs.len());

  for (index, def) in defs.iter().enumerate() {
    if !seen.insert(def.name.as_str()) {
      return Err(DeclarationError::DuplicateInput {
        process: process.to_string(),
        param: def.name.clone(),
      });
    }

    let kind = match &def.input_type {
      InputType::Val => InputKind::Value,
      InputType::File { pattern } => InputKind::File {
        pattern: pattern.clone(),
      },
      InputType::Each => InputKind::EachValue,
      InputType::EachFile { pattern } => InputKind::EachFile {
        pattern: pattern.clone(),
      },
      InputType::SharedVal { into } => InputKind::SharedValue { into: into.clone() },
      InputType::SharedFile { pattern, into } => InputKind::SharedFile {
        pattern: pattern.clone(),
        into: into.clone(),
      },
      InputType::Stdin => InputKind::StdIn,
      InputType::Env => InputKind::Env,
      InputType::Unsupported => InputKind::Unsupported,
    };

    params.push(InputParam {
      name: def.name.clone(),
      index,
      source: def.from.clone(),
      kind,
    });
  }

  Ok(params)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn def(name: &str, input_type: InputType) -> InputDef {
    InputDef {
      name: name.to_string(),
      from: format!("{}_ch", name),
      input_type,
    }
  }

  #[test]
  fn test_positional_indices() {
    let params = build_inputs(
      "p",
      &[
        def("a", InputType::Val),
        def("b", InputType::Each),
        def("c", InputType::SharedVal { into: None }),
      ],
    )
    .unwrap();

    assert_eq!(params[0].index, 0);
    assert_eq!(params[1].index, 1);
    assert!(params[1].is_each());
    assert!(params[2].is_shared());
    assert_eq!(params[2].source, "c_ch");
  }

  #[test]
  fn test_duplicate_input_rejected() {
    let err = build_inputs("p", &[def("a", InputType::Val), def("a", InputType::Env)]).unwrap_err();
    assert!(matches!(err, DeclarationError::DuplicateInput { .. }));
  }

  #[test]
  fn test_capture_only_on_first_firing() {
    let params = build_inputs(
      "p",
      &[
        def("v", InputType::Val),
        def("s", InputType::SharedFile {
          pattern: None,
          into: Some("out".to_string()),
        }),
      ],
    )
    .unwrap();

    assert!(!params[0].captures_on(1));
    assert!(params[1].captures_on(1));
    assert!(!params[1].captures_on(2));
    assert_eq!(params[1].into_target(), Some("out"));
  }
}
