//! Values carried on channels.
//!
//! An [`Item`] is either a plain JSON value, a file, or a list of items.
//! Files serialize as `{"$file": "<store path>"}` so that pipeline seeds and
//! cache keys use the same representation.

use std::path::{Path, PathBuf};

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const FILE_KEY: &str = "$file";

/// A file staged into a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileHolder {
  /// Where the file actually lives.
  pub store_path: PathBuf,
  /// The name the file takes inside the task work directory.
  pub stage_name: String,
}

impl FileHolder {
  /// Create a holder staged under the file's own name.
  pub fn new(store_path: impl Into<PathBuf>) -> Self {
    let store_path = store_path.into();
    let stage_name = store_path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| store_path.to_string_lossy().into_owned());
    Self {
      store_path,
      stage_name,
    }
  }

  /// Same file, different stage name.
  pub fn with_name(&self, stage_name: impl Into<String>) -> Self {
    Self {
      store_path: self.store_path.clone(),
      stage_name: stage_name.into(),
    }
  }

  pub fn store_path(&self) -> &Path {
    &self.store_path
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
  Value(serde_json::Value),
  File(FileHolder),
  List(Vec<Item>),
}

impl Item {
  /// Build an item from JSON. Arrays become lists and `{"$file": ..}`
  /// objects become files.
  pub fn from_json(value: serde_json::Value) -> Self {
    match value {
      serde_json::Value::Array(values) => {
        Item::List(values.into_iter().map(Item::from_json).collect())
      }
      serde_json::Value::Object(map) if map.len() == 1 && map.contains_key(FILE_KEY) => {
        match map.get(FILE_KEY) {
          Some(serde_json::Value::String(path)) => Item::File(FileHolder::new(path)),
          _ => Item::Value(serde_json::Value::Object(map)),
        }
      }
      other => Item::Value(other),
    }
  }

  pub fn file(path: impl Into<PathBuf>) -> Self {
    Item::File(FileHolder::new(path))
  }

  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Item::Value(v) => v.clone(),
      Item::File(f) => serde_json::json!({ FILE_KEY: f.store_path.to_string_lossy() }),
      Item::List(items) => serde_json::Value::Array(items.iter().map(Item::to_json).collect()),
    }
  }

  /// The elements of a collection, or the item itself as a one-element
  /// collection.
  pub fn elements(&self) -> Vec<Item> {
    match self {
      Item::List(items) => items.clone(),
      other => vec![other.clone()],
    }
  }

  /// Normalize a file-bearing value into concrete files.
  ///
  /// Strings are taken as paths. Returns `None` if any element cannot be
  /// interpreted as a file.
  pub fn files(&self) -> Option<Vec<FileHolder>> {
    match self {
      Item::File(f) => Some(vec![f.clone()]),
      Item::Value(serde_json::Value::String(path)) => Some(vec![FileHolder::new(path)]),
      Item::List(items) => {
        let mut files = Vec::new();
        for item in items {
          files.extend(item.files()?);
        }
        Some(files)
      }
      Item::Value(_) => None,
    }
  }

  /// The value a script template sees.
  ///
  /// Files render as their stage name; a list made only of files renders as
  /// the blank-separated stage names.
  pub fn to_template_value(&self) -> serde_json::Value {
    match self {
      Item::Value(v) => v.clone(),
      Item::File(f) => serde_json::Value::String(f.stage_name.clone()),
      Item::List(items)
        if !items.is_empty() && items.iter().all(|i| matches!(i, Item::File(_))) =>
      {
        let names: Vec<&str> = items
          .iter()
          .filter_map(|i| match i {
            Item::File(f) => Some(f.stage_name.as_str()),
            _ => None,
          })
          .collect();
        serde_json::Value::String(names.join(" "))
      }
      Item::List(items) => {
        serde_json::Value::Array(items.iter().map(Item::to_template_value).collect())
      }
    }
  }

  /// Plain text form, used for stdin and environment values.
  pub fn to_text(&self) -> String {
    match self.to_template_value() {
      serde_json::Value::String(s) => s,
      other => other.to_string(),
    }
  }
}

impl From<serde_json::Value> for Item {
  fn from(value: serde_json::Value) -> Self {
    Item::from_json(value)
  }
}

impl From<FileHolder> for Item {
  fn from(file: FileHolder) -> Self {
    Item::File(file)
  }
}

impl Serialize for Item {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      Item::Value(v) => v.serialize(serializer),
      Item::File(f) => {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(FILE_KEY, &f.store_path)?;
        map.end()
      }
      Item::List(items) => {
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in items {
          seq.serialize_element(item)?;
        }
        seq.end()
      }
    }
  }
}

impl<'de> Deserialize<'de> for Item {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    serde_json::Value::deserialize(deserializer).map(Item::from_json)
  }
}
