//! Task cache keys and the store that looks them up.
//!
//! A key is the SHA-256 of a canonical JSON document describing the task:
//! the session id, the process name, the rendered script and the ordered
//! input values. Its hex form also names the task's work directory
//! (`<base>/<first two chars>/<rest>`), so a previous run's results can be
//! found again from the key alone. When that directory is taken, later
//! attempts use [`CacheKey::attempt`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use sluice_process::{Item, OutputParam, glob_match};
use uuid::Uuid;

use crate::error::RuntimeError;
use crate::executor::{EXIT_CODE_FILE, STDOUT_FILE};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CacheKey(String);

impl CacheKey {
  /// Compute the key of a task.
  ///
  /// Input order is significant: the same values bound to differently
  /// ordered params give a different key.
  pub fn compute(
    session_id: &Uuid,
    process: &str,
    script: &str,
    inputs: &IndexMap<String, Item>,
  ) -> Self {
    let pairs: Vec<serde_json::Value> = inputs
      .iter()
      .map(|(name, item)| serde_json::json!([name, item.to_json()]))
      .collect();

    let document = serde_json::json!({
      "session": session_id.to_string(),
      "process": process,
      "script": script,
      "inputs": pairs,
    });

    let mut hasher = Sha256::new();
    hasher.update(to_canonical_json(&document).as_bytes());
    CacheKey(format!("{:x}", hasher.finalize()))
  }

  /// The key for the `attempt`-th work directory of this task.
  ///
  /// Attempt 0 is the key itself; later attempts hash `[key, attempt]`.
  pub fn attempt(&self, attempt: u32) -> Self {
    if attempt == 0 {
      return self.clone();
    }
    let document = serde_json::json!([self.0, attempt]);
    let mut hasher = Sha256::new();
    hasher.update(to_canonical_json(&document).as_bytes());
    CacheKey(format!("{:x}", hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Work directory for this key under `base`.
  pub fn work_dir(&self, base: &Path) -> PathBuf {
    let (head, tail) = self.0.split_at(2);
    base.join(head).join(tail)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Serialize JSON with object keys sorted, so equal values hash equally.
pub fn to_canonical_json(value: &serde_json::Value) -> String {
  use serde_json::Value;

  match value {
    Value::Null => "null".to_string(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    Value::String(_) => value.to_string(),
    Value::Array(items) => {
      let items: Vec<String> = items.iter().map(to_canonical_json).collect();
      format!("[{}]", items.join(","))
    }
    Value::Object(map) => {
      let sorted: BTreeMap<&String, String> = map
        .iter()
        .map(|(k, v)| (k, to_canonical_json(v)))
        .collect();
      let items: Vec<String> = sorted
        .into_iter()
        .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
        .collect();
      format!("{{{}}}", items.join(","))
    }
  }
}

/// Where previous task results are looked up.
#[async_trait]
pub trait CacheStore: Send + Sync {
  /// The work directory of a previous successful run of this key, if any.
  async fn lookup(&self, key: &CacheKey) -> Result<Option<PathBuf>, RuntimeError>;

  /// Whether `dir` still holds everything `outputs` expects.
  async fn has_valid_outputs(
    &self,
    dir: &Path,
    outputs: &[OutputParam],
  ) -> Result<bool, RuntimeError>;
}

/// Cache backed by task work directories on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
  base: PathBuf,
}

impl FsCacheStore {
  pub fn new(base: impl Into<PathBuf>) -> Self {
    Self { base: base.into() }
  }
}

#[async_trait]
impl CacheStore for FsCacheStore {
  async fn lookup(&self, key: &CacheKey) -> Result<Option<PathBuf>, RuntimeError> {
    let dir = key.work_dir(&self.base);
    let exit_file = dir.join(EXIT_CODE_FILE);

    let contents = match tokio::fs::read_to_string(&exit_file).await {
      Ok(contents) => contents,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(RuntimeError::io(exit_file, e)),
    };

    match contents.trim().parse::<i32>() {
      Ok(0) => Ok(Some(dir)),
      _ => Ok(None),
    }
  }

  async fn has_valid_outputs(
    &self,
    dir: &Path,
    outputs: &[OutputParam],
  ) -> Result<bool, RuntimeError> {
    for output in outputs {
      if output.uses_stdout() {
        let stdout = dir.join(STDOUT_FILE);
        if !tokio::fs::try_exists(&stdout).await.unwrap_or(false) {
          return Ok(false);
        }
      }
      for pattern in output.file_patterns() {
        if list_matches(dir, pattern).await?.is_empty() {
          return Ok(false);
        }
      }
    }
    Ok(true)
  }
}

/// Entries of `dir` matching `pattern`, sorted by name.
///
/// A pattern with a directory part (`logs/*.txt`) is matched inside that
/// subdirectory. Hidden entries are never matched.
pub(crate) async fn list_matches(
  dir: &Path,
  pattern: &str,
) -> Result<Vec<PathBuf>, RuntimeError> {
  let (subdir, name_pattern) = match pattern.rfind('/') {
    Some(p) => (dir.join(&pattern[..p]), &pattern[p + 1..]),
    None => (dir.to_path_buf(), pattern),
  };

  let mut entries = match tokio::fs::read_dir(&subdir).await {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
    Err(e) => return Err(RuntimeError::io(subdir, e)),
  };

  let mut matches = Vec::new();
  while let Some(entry) = entries
    .next_entry()
    .await
    .map_err(|e| RuntimeError::io(&subdir, e))?
  {
    let name = entry.file_name().to_string_lossy().into_owned();
    if !name.starts_with('.') && glob_match(name_pattern, &name) {
      matches.push(entry.path());
    }
  }
  matches.sort();
  Ok(matches)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use sluice_process::{OutputKind, OutputMode};

  fn inputs(pairs: &[(&str, serde_json::Value)]) -> IndexMap<String, Item> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), Item::from(v.clone())))
      .collect()
  }

  fn file_output(pattern: &str) -> OutputParam {
    OutputParam {
      name: pattern.to_string(),
      index: 0,
      kind: OutputKind::File {
        pattern: pattern.to_string(),
      },
      into: None,
      mode: OutputMode::Standard,
    }
  }

  #[test]
  fn test_canonical_json_sorts_keys() {
    let a = json!({"b": 1, "a": {"y": [1, 2], "x": "s"}});
    assert_eq!(to_canonical_json(&a), r#"{"a":{"x":"s","y":[1,2]},"b":1}"#);
  }

  #[test]
  fn test_key_is_deterministic() {
    let session = Uuid::new_v4();
    let values = inputs(&[("x", json!(1)), ("y", json!("a"))]);

    let a = CacheKey::compute(&session, "p", "echo 1 a", &values);
    let b = CacheKey::compute(&session, "p", "echo 1 a", &values);
    assert_eq!(a, b);
    assert_eq!(a.as_str().len(), 64);
  }

  #[test]
  fn test_key_depends_on_input_order() {
    let session = Uuid::new_v4();
    let forward = inputs(&[("x", json!(1)), ("y", json!(2))]);
    let reverse = inputs(&[("y", json!(2)), ("x", json!(1))]);

    assert_ne!(
      CacheKey::compute(&session, "p", "s", &forward),
      CacheKey::compute(&session, "p", "s", &reverse)
    );
  }

  #[test]
  fn test_key_depends_on_session_and_script() {
    let values = inputs(&[("x", json!(1))]);
    let session = Uuid::new_v4();
    let base = CacheKey::compute(&session, "p", "s", &values);

    assert_ne!(base, CacheKey::compute(&Uuid::new_v4(), "p", "s", &values));
    assert_ne!(base, CacheKey::compute(&session, "p", "t", &values));
    assert_ne!(base, CacheKey::compute(&session, "q", "s", &values));
  }

  #[test]
  fn test_key_depends_on_input_value() {
    let session = Uuid::new_v4();
    let key = |values: &[(&str, serde_json::Value)]| {
      CacheKey::compute(&session, "p", "s", &inputs(values))
    };

    assert_ne!(key(&[("x", json!(1))]), key(&[("x", json!(2))]));
    assert_ne!(
      key(&[("f", json!({ "$file": "/data/a.fq" }))]),
      key(&[("f", json!({ "$file": "/data/b.fq" }))])
    );
    assert_ne!(
      key(&[("x", json!(1)), ("y", json!("a"))]),
      key(&[("x", json!(1)), ("y", json!("b"))])
    );
  }

  #[test]
  fn test_attempt_keys_are_distinct() {
    let key = CacheKey::compute(&Uuid::new_v4(), "p", "s", &inputs(&[("x", json!(1))]));

    assert_eq!(key.attempt(0), key);
    assert_ne!(key.attempt(1), key);
    assert_ne!(key.attempt(1), key.attempt(2));
    assert_eq!(key.attempt(1), key.attempt(1));
    assert_eq!(key.attempt(1).as_str().len(), 64);
  }

  #[test]
  fn test_work_dir_layout() {
    let key = CacheKey("ab12cd".to_string());
    assert_eq!(key.work_dir(Path::new("/w")), PathBuf::from("/w/ab/12cd"));
  }

  #[tokio::test]
  async fn test_lookup_requires_zero_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsCacheStore::new(tmp.path());
    let key = CacheKey::compute(&Uuid::new_v4(), "p", "s", &IndexMap::new());

    assert_eq!(store.lookup(&key).await.unwrap(), None);

    let dir = key.work_dir(tmp.path());
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(EXIT_CODE_FILE), "1").unwrap();
    assert_eq!(store.lookup(&key).await.unwrap(), None);

    std::fs::write(dir.join(EXIT_CODE_FILE), "0\n").unwrap();
    assert_eq!(store.lookup(&key).await.unwrap(), Some(dir));
  }

  #[tokio::test]
  async fn test_has_valid_outputs() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FsCacheStore::new(tmp.path());
    let outputs = vec![file_output("*.bam")];

    assert!(!store.has_valid_outputs(tmp.path(), &outputs).await.unwrap());

    std::fs::write(tmp.path().join("sample.bam"), "").unwrap();
    assert!(store.has_valid_outputs(tmp.path(), &outputs).await.unwrap());
  }

  #[tokio::test]
  async fn test_list_matches_skips_hidden_and_sorts() {
    let tmp = tempfile::tempdir().unwrap();
    for name in ["b.txt", "a.txt", ".command.txt", "c.log"] {
      std::fs::write(tmp.path().join(name), "").unwrap();
    }
    std::fs::create_dir(tmp.path().join("logs")).unwrap();
    std::fs::write(tmp.path().join("logs/run.txt"), "").unwrap();

    let found = list_matches(tmp.path(), "*.txt").await.unwrap();
    assert_eq!(found, vec![tmp.path().join("a.txt"), tmp.path().join("b.txt")]);

    let nested = list_matches(tmp.path(), "logs/*.txt").await.unwrap();
    assert_eq!(nested, vec![tmp.path().join("logs/run.txt")]);
  }
}
