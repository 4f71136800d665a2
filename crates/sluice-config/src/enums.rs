use serde::{Deserialize, Serialize};

/// What a process does when one of its firings fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
  /// Stop admitting new firings; in-flight firings still complete.
  #[default]
  Terminate,
  /// Log the failure and keep the operator running.
  Ignore,
}
