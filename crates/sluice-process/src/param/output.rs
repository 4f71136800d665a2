use std::fmt;

use sluice_config::OutputDef;

use crate::error::DeclarationError;

/// How a resolved output value is emitted onto its channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputMode {
  /// Emit the resolved value as-is.
  #[default]
  Standard,
  /// Emit each element of a collection as a separate item.
  Flatten,
  /// Merge the inner values of an output set into one item.
  Combine,
}

impl OutputMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      OutputMode::Standard => "standard",
      OutputMode::Flatten => "flatten",
      OutputMode::Combine => "combine",
    }
  }

  fn legal(aggregate: bool) -> &'static [OutputMode] {
    if aggregate {
      &[OutputMode::Standard, OutputMode::Flatten, OutputMode::Combine]
    } else {
      &[OutputMode::Standard, OutputMode::Flatten]
    }
  }

  fn parse(
    process: &str,
    param: &str,
    raw: Option<&str>,
    aggregate: bool,
  ) -> Result<Self, DeclarationError> {
    let Some(raw) = raw else {
      return Ok(OutputMode::Standard);
    };

    let legal = Self::legal(aggregate);
    legal
      .iter()
      .copied()
      .find(|m| m.as_str() == raw)
      .ok_or_else(|| DeclarationError::InvalidOutputMode {
        process: process.to_string(),
        param: param.to_string(),
        mode: raw.to_string(),
        expected: legal
          .iter()
          .map(|m| m.as_str())
          .collect::<Vec<_>>()
          .join(", "),
      })
  }
}

impl fmt::Display for OutputMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An output parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParam {
  /// For file outputs this is derived from the pattern.
  pub name: String,
  /// Position within the owning list (the process, or the enclosing set).
  pub index: usize,
  pub kind: OutputKind,
  /// Named channel the value is emitted into.
  pub into: Option<String>,
  pub mode: OutputMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutputKind {
  File { pattern: String },
  Value,
  StdOut,
  Aggregate { inner: Vec<OutputParam> },
}

impl OutputParam {
  /// Name of the channel this output is bound to: the `into` target, or a
  /// channel named after the param itself.
  pub fn channel_name(&self) -> &str {
    self.into.as_deref().unwrap_or(&self.name)
  }

  /// Every file pattern this output expects, including those of inner
  /// params of a set.
  pub fn file_patterns(&self) -> Vec<&str> {
    match &self.kind {
      OutputKind::File { pattern } => vec![pattern.as_str()],
      OutputKind::Aggregate { inner } => inner.iter().flat_map(|p| p.file_patterns()).collect(),
      OutputKind::Value | OutputKind::StdOut => Vec::new(),
    }
  }

  /// Whether this output (or any inner one) reads the task's stdout.
  pub fn uses_stdout(&self) -> bool {
    match &self.kind {
      OutputKind::StdOut => true,
      OutputKind::Aggregate { inner } => inner.iter().any(|p| p.uses_stdout()),
      _ => false,
    }
  }
}

pub(crate) fn build_outputs(
  process: &str,
  defs: &[OutputDef],
) -> Result<Vec<OutputParam>, DeclarationError> {
  // Each list gets its own index scope; sets recurse with a fresh one.
  defs
    .iter()
    .enumerate()
    .map(|(index, def)| build_output(process, def, index, false))
    .collect()
}

fn build_output(
  process: &str,
  def: &OutputDef,
  index: usize,
  nested: bool,
) -> Result<OutputParam, DeclarationError> {
  match def {
    OutputDef::File {
      pattern,
      into,
      mode,
    } => Ok(OutputParam {
      name: pattern.clone(),
      index,
      mode: OutputMode::parse(process, pattern, mode.as_deref(), false)?,
      kind: OutputKind::File {
        pattern: pattern.clone(),
      },
      into: into.clone(),
    }),
    OutputDef::Val { name, into, mode } => Ok(OutputParam {
      name: name.clone(),
      index,
      mode: OutputMode::parse(process, name, mode.as_deref(), false)?,
      kind: OutputKind::Value,
      into: into.clone(),
    }),
    OutputDef::Stdout { into, mode } => Ok(OutputParam {
      name: "stdout".to_string(),
      index,
      mode: OutputMode::parse(process, "stdout", mode.as_deref(), false)?,
      kind: OutputKind::StdOut,
      into: into.clone(),
    }),
    OutputDef::Set {
      outputs,
      into,
      mode,
    } => {
      let fallback = format!("set{}", index);
      if nested {
        return Err(DeclarationError::NestedSet {
          process: process.to_string(),
          param: into.clone().unwrap_or(fallback),
        });
      }
      let Some(target) = into else {
        return Err(DeclarationError::MissingInto {
          process: process.to_string(),
          param: fallback,
        });
      };

      let inner = outputs
        .iter()
        .enumerate()
        .map(|(i, d)| build_output(process, d, i, true))
        .collect::<Result<Vec<_>, _>>()?;

      Ok(OutputParam {
        name: target.clone(),
        index,
        mode: OutputMode::parse(process, target, mode.as_deref(), true)?,
        kind: OutputKind::Aggregate { inner },
        into: Some(target.clone()),
      })
    }
  }
}
