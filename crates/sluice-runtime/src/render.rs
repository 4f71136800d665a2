//! Script rendering using minijinja templates.
//!
//! A template body is rendered against the task context: the task's own
//! input bindings first, then the pipeline params.
//!
//! ```text
//! echo {{ x }} {{ y }} > pair.txt
//! bwa mem {{ genome }} {{ reads }}
//! ```
//!
//! Files render as their stage name. Referencing a name that is neither
//! bound nor a param fails the render.

use minijinja::{Environment, UndefinedBehavior, Value};

use crate::error::RuntimeError;
use crate::task::TaskContext;

/// Turns a body template into the script a task runs.
pub trait ScriptRenderer: Send + Sync {
  fn render(
    &self,
    process: &str,
    template: &str,
    context: &TaskContext,
  ) -> Result<String, RuntimeError>;
}

/// Renders bodies with minijinja.
pub struct MinijinjaRenderer {
  env: Environment<'static>,
}

impl Default for MinijinjaRenderer {
  fn default() -> Self {
    Self::new()
  }
}

impl MinijinjaRenderer {
  pub fn new() -> Self {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    Self { env }
  }
}

impl ScriptRenderer for MinijinjaRenderer {
  fn render(
    &self,
    process: &str,
    template: &str,
    context: &TaskContext,
  ) -> Result<String, RuntimeError> {
    let ctx = Value::from_serialize(context.to_template_context());
    self
      .env
      .render_str(template, ctx)
      .map_err(|e| RuntimeError::Render {
        process: process.to_string(),
        message: e.to_string(),
      })
  }
}
