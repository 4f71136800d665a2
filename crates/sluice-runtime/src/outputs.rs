//! Output collection and emission.
//!
//! After a task completes, every declared output is resolved against the
//! task (its work directory, its context, its stdout) and only then pushed
//! onto the bound channels, so a missing output emits nothing at all.

use sluice_process::{FileHolder, Item, OutputKind, OutputMode, OutputParam};

use crate::cache::list_matches;
use crate::channel::ChannelSender;
use crate::error::RuntimeError;
use crate::task::TaskRun;

/// An output param and the channel it writes to.
#[derive(Debug, Clone)]
pub(crate) struct OutputBinding {
  pub param: OutputParam,
  pub sender: ChannelSender,
}

/// Resolve every output of `task` and emit them in declaration order.
pub(crate) async fn bind_outputs(
  bindings: &[OutputBinding],
  task: &TaskRun,
) -> Result<(), RuntimeError> {
  let mut resolved = Vec::with_capacity(bindings.len());
  for binding in bindings {
    resolved.push(collect_output(&binding.param, task).await?);
  }

  for (binding, item) in bindings.iter().zip(resolved) {
    emit(&binding.sender, binding.param.mode, item)?;
  }
  Ok(())
}

/// The value an output resolves to for a completed task.
pub(crate) async fn collect_output(
  param: &OutputParam,
  task: &TaskRun,
) -> Result<Item, RuntimeError> {
  match &param.kind {
    OutputKind::Aggregate { inner } => {
      let mut values = Vec::with_capacity(inner.len());
      for p in inner {
        values.push(collect_leaf(p, task).await?);
      }
      if param.mode == OutputMode::Combine {
        values = values.iter().flat_map(Item::elements).collect();
      }
      Ok(Item::List(values))
    }
    _ => collect_leaf(param, task).await,
  }
}

async fn collect_leaf(param: &OutputParam, task: &TaskRun) -> Result<Item, RuntimeError> {
  let missing = |message: String| RuntimeError::MissingOutput {
    task: task.name(),
    param: param.name.clone(),
    message,
  };

  match &param.kind {
    OutputKind::File { pattern } => {
      let work_dir = task
        .work_dir
        .as_deref()
        .ok_or_else(|| missing("task has no work directory".to_string()))?;

      let mut files: Vec<FileHolder> = list_matches(work_dir, pattern)
        .await?
        .into_iter()
        .filter(|path| {
          let relative = path.strip_prefix(work_dir).unwrap_or(path);
          !task
            .input_files
            .iter()
            .any(|f| relative == std::path::Path::new(&f.stage_name))
        })
        .map(FileHolder::new)
        .collect();

      match files.len() {
        0 => Err(missing(format!("no file matches '{}'", pattern))),
        1 => Ok(Item::File(files.remove(0))),
        _ => Ok(Item::List(files.into_iter().map(Item::File).collect())),
      }
    }
    OutputKind::Value => task
      .context
      .get(&param.name)
      .ok_or_else(|| missing("name is not bound in the task context".to_string())),
    OutputKind::StdOut => task
      .stdout
      .clone()
      .map(|s| Item::Value(serde_json::Value::String(s)))
      .ok_or_else(|| missing("task produced no standard output".to_string())),
    OutputKind::Aggregate { .. } => Err(missing("output sets cannot be nested".to_string())),
  }
}

/// Push `item` onto `sender` according to `mode`. Returns the number of
/// items pushed.
pub(crate) fn emit(
  sender: &ChannelSender,
  mode: OutputMode,
  item: Item,
) -> Result<usize, RuntimeError> {
  match (mode, item) {
    (OutputMode::Flatten, Item::List(items)) => {
      let count = items.len();
      for item in items {
        sender.push(item)?;
      }
      Ok(count)
    }
    (_, item) => {
      sender.push(item)?;
      Ok(1)
    }
  }
}
