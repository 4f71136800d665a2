use thiserror::Error;

/// Errors in a process declaration.
///
/// These are fatal: a process that fails validation is never installed, and
/// one raised at run time stops the operator regardless of its error strategy.
#[derive(Debug, Error)]
pub enum DeclarationError {
  #[error(
    "invalid mode '{mode}' for output '{param}' in process '{process}' (expected one of: {expected})"
  )]
  InvalidOutputMode {
    process: String,
    param: String,
    mode: String,
    expected: String,
  },

  #[error("output set '{param}' in process '{process}' must declare an `into` target")]
  MissingInto { process: String, param: String },

  #[error("output set '{param}' in process '{process}' cannot contain another set")]
  NestedSet { process: String, param: String },

  #[error("duplicate input '{param}' in process '{process}'")]
  DuplicateInput { process: String, param: String },

  #[error(
    "shared file '{param}' in process '{process}' must resolve to exactly one file, got {count}"
  )]
  SharedFileCardinality {
    process: String,
    param: String,
    count: usize,
  },
}
