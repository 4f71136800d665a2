use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use sluice_process::{FileHolder, Item};

use crate::cache::CacheKey;

/// Lifecycle of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  New,
  /// Outputs were recovered from a previous run.
  Cached,
  Submitted,
  Succeeded,
  Failed,
}

/// Variable scope the task body sees.
///
/// Lookups check the task's own bindings first and fall back to the
/// pipeline-level defaults.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
  bindings: IndexMap<String, Item>,
  defaults: Arc<serde_json::Map<String, serde_json::Value>>,
}

impl TaskContext {
  pub fn new(defaults: Arc<serde_json::Map<String, serde_json::Value>>) -> Self {
    Self {
      bindings: IndexMap::new(),
      defaults,
    }
  }

  pub fn bind(&mut self, name: impl Into<String>, item: Item) {
    self.bindings.insert(name.into(), item);
  }

  pub fn get(&self, name: &str) -> Option<Item> {
    self
      .bindings
      .get(name)
      .cloned()
      .or_else(|| self.defaults.get(name).cloned().map(Item::from_json))
  }

  pub fn bindings(&self) -> &IndexMap<String, Item> {
    &self.bindings
  }

  /// The context as a template value. Bindings shadow defaults.
  pub fn to_template_context(&self) -> serde_json::Value {
    let mut map = (*self.defaults).clone();
    for (name, item) in &self.bindings {
      map.insert(name.clone(), item.to_template_value());
    }
    serde_json::Value::Object(map)
  }
}

/// One firing of a process.
#[derive(Debug, Clone)]
pub struct TaskRun {
  pub process: String,
  /// 1-based firing index within the process.
  pub index: u64,
  /// Raw resolved input values, in declaration order.
  pub inputs: IndexMap<String, Item>,
  pub context: TaskContext,
  /// Files to stage into the work directory.
  pub input_files: Vec<FileHolder>,
  pub script: String,
  /// Set when the body is a native body rather than a shell template.
  pub native: bool,
  pub stdin: Option<String>,
  pub env: IndexMap<String, String>,
  pub hash: Option<CacheKey>,
  pub work_dir: Option<PathBuf>,
  pub status: TaskStatus,
  pub exit_status: Option<i32>,
  pub stdout: Option<String>,
}

impl TaskRun {
  pub fn new(
    process: impl Into<String>,
    index: u64,
    defaults: Arc<serde_json::Map<String, serde_json::Value>>,
  ) -> Self {
    Self {
      process: process.into(),
      index,
      inputs: IndexMap::new(),
      context: TaskContext::new(defaults),
      input_files: Vec::new(),
      script: String::new(),
      native: false,
      stdin: None,
      env: IndexMap::new(),
      hash: None,
      work_dir: None,
      status: TaskStatus::New,
      exit_status: None,
      stdout: None,
    }
  }

  /// Display name, e.g. `align (3)`.
  pub fn name(&self) -> String {
    format!("{} ({})", self.process, self.index)
  }

  /// Bind an input value both as a raw input and into the body's scope.
  pub fn bind_input(&mut self, name: &str, item: Item) {
    self.context.bind(name, item.clone());
    self.inputs.insert(name.to_string(), item);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn defaults() -> Arc<serde_json::Map<String, serde_json::Value>> {
    let mut map = serde_json::Map::new();
    map.insert("genome".to_string(), json!("hg38"));
    map.insert("x".to_string(), json!("outer"));
    Arc::new(map)
  }

  #[test]
  fn test_bindings_shadow_defaults() {
    let mut ctx = TaskContext::new(defaults());
    ctx.bind("x", Item::from(json!(1)));

    assert_eq!(ctx.get("x"), Some(Item::from(json!(1))));
    assert_eq!(ctx.get("genome"), Some(Item::from(json!("hg38"))));
    assert_eq!(ctx.get("missing"), None);

    let value = ctx.to_template_context();
    assert_eq!(value["x"], 1);
    assert_eq!(value["genome"], "hg38");
  }

  #[test]
  fn test_bind_input_records_raw_value() {
    let mut task = TaskRun::new("align", 3, defaults());
    task.bind_input("reads", Item::file("/data/r1.fq"));

    assert_eq!(task.name(), "align (3)");
    assert_eq!(task.inputs["reads"], Item::file("/data/r1.fq"));
    assert_eq!(task.context.to_template_context()["reads"], "r1.fq");
    assert_eq!(task.status, TaskStatus::New);
  }
}
