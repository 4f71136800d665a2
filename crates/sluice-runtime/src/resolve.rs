//! Input resolution.
//!
//! Binds one firing tuple onto a [`TaskRun`]. Each input kind has its own
//! arm: plain values bind as-is, files are normalized and renamed by their
//! pattern, shared inputs go through the [`SharedRegistry`], and stdin/env
//! inputs also set up the task's process environment.

use std::collections::HashMap;

use sluice_process::{
  DeclarationError, FileHolder, InputKind, InputParam, Item, ProcessDefinition, expand_file_names,
};
use tracing::warn;

use crate::error::RuntimeError;
use crate::shared::SharedRegistry;
use crate::task::TaskRun;

/// Bind every declared input of `process` from `tuple` onto `task`.
pub(crate) fn resolve_inputs(
  process: &ProcessDefinition,
  tuple: &[Item],
  task: &mut TaskRun,
  shared: &mut SharedRegistry,
) -> Result<(), RuntimeError> {
  let mut staged: HashMap<String, String> = HashMap::new();

  for param in &process.inputs {
    let raw = param
      .extract(tuple)
      .ok_or_else(|| RuntimeError::InputResolution {
        process: process.name.clone(),
        param: param.name.clone(),
        message: format!("no value at position {}", param.index),
      })?;

    match &param.kind {
      InputKind::Value | InputKind::EachValue => {
        task.bind_input(&param.name, raw.clone());
      }

      InputKind::File { pattern } | InputKind::EachFile { pattern } => {
        let files = stage_files(process, param, raw, pattern.as_deref())?;
        claim_stage_names(process, param, &files, &mut staged)?;
        task.input_files.extend(files.iter().cloned());
        task.bind_input(&param.name, files_item(files));
      }

      InputKind::SharedValue { .. } => {
        let value = if param.captures_on(task.index) {
          shared.capture(&param.name, raw.clone())?;
          raw.clone()
        } else {
          shared.get(&param.name)?
        };
        task.bind_input(&param.name, value);
      }

      InputKind::SharedFile { pattern, .. } => {
        let file = if param.captures_on(task.index) {
          let mut files = stage_files(process, param, raw, pattern.as_deref())?;
          if files.len() != 1 {
            return Err(
              DeclarationError::SharedFileCardinality {
                process: process.name.clone(),
                param: param.name.clone(),
                count: files.len(),
              }
              .into(),
            );
          }
          let file = files.remove(0);
          shared.capture(&param.name, Item::File(file.clone()))?;
          file
        } else {
          match shared.get(&param.name)? {
            Item::File(file) => file,
            other => {
              return Err(RuntimeError::InputResolution {
                process: process.name.clone(),
                param: param.name.clone(),
                message: format!("shared value is not a file: {:?}", other),
              });
            }
          }
        };
        claim_stage_names(process, param, std::slice::from_ref(&file), &mut staged)?;
        task.input_files.push(file.clone());
        task.bind_input(&param.name, Item::File(file));
      }

      InputKind::StdIn => {
        task.stdin = Some(raw.to_text());
        task.bind_input(&param.name, raw.clone());
      }

      InputKind::Env => {
        task.env.insert(param.name.clone(), raw.to_text());
        task.bind_input(&param.name, raw.clone());
      }

      InputKind::Unsupported => {
        warn!(
          process = %process.name,
          param = %param.name,
          "unsupported input parameter type, skipping"
        );
      }
    }
  }

  Ok(())
}

fn stage_files(
  process: &ProcessDefinition,
  param: &InputParam,
  raw: &Item,
  pattern: Option<&str>,
) -> Result<Vec<FileHolder>, RuntimeError> {
  let files = raw.files().ok_or_else(|| RuntimeError::InputResolution {
    process: process.name.clone(),
    param: param.name.clone(),
    message: "value is not a file or a list of files".to_string(),
  })?;

  expand_file_names(pattern, files).map_err(|e| RuntimeError::InputResolution {
    process: process.name.clone(),
    param: param.name.clone(),
    message: e.to_string(),
  })
}

/// Record the stage names of `files`, rejecting any already used by this
/// task's inputs.
fn claim_stage_names(
  process: &ProcessDefinition,
  param: &InputParam,
  files: &[FileHolder],
  staged: &mut HashMap<String, String>,
) -> Result<(), RuntimeError> {
  for file in files {
    if let Some(owner) = staged.insert(file.stage_name.clone(), param.name.clone()) {
      return Err(RuntimeError::InputResolution {
        process: process.name.clone(),
        param: param.name.clone(),
        message: format!(
          "stage name '{}' is already used by input '{}'",
          file.stage_name, owner
        ),
      });
    }
  }
  Ok(())
}

fn files_item(mut files: Vec<FileHolder>) -> Item {
  if files.len() == 1 {
    Item::File(files.remove(0))
  } else {
    Item::List(files.into_iter().map(Item::File).collect())
  }
}
