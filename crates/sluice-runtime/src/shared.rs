//! Values shared between the firings of one process.
//!
//! A shared input is captured by the first firing and reused by every
//! later one. When the operator stops, each captured value is published
//! once to its `into` channel (if any) and that channel is released.

use indexmap::IndexMap;
use sluice_process::Item;
use tracing::debug;

use crate::channel::ChannelSender;
use crate::error::RuntimeError;

#[derive(Debug, Default)]
struct SharedSlot {
  value: Option<Item>,
  target: Option<ChannelSender>,
}

/// Shared-input state of a single operator.
#[derive(Debug, Default)]
pub struct SharedRegistry {
  slots: IndexMap<String, SharedSlot>,
}

impl SharedRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Declare a shared param and where its final value goes.
  pub fn register(&mut self, name: impl Into<String>, target: Option<ChannelSender>) {
    self.slots.insert(
      name.into(),
      SharedSlot {
        value: None,
        target,
      },
    );
  }

  /// Store the value seen by the capturing firing.
  pub fn capture(&mut self, name: &str, value: Item) -> Result<(), RuntimeError> {
    let slot = self.slots.entry(name.to_string()).or_default();
    if slot.value.is_some() {
      return Err(RuntimeError::SharedAlreadyCaptured {
        param: name.to_string(),
      });
    }
    slot.value = Some(value);
    Ok(())
  }

  pub fn get(&self, name: &str) -> Result<Item, RuntimeError> {
    self
      .slots
      .get(name)
      .and_then(|slot| slot.value.clone())
      .ok_or_else(|| RuntimeError::SharedNotCaptured {
        param: name.to_string(),
      })
  }

  /// Emit every captured value to its target channel and release it.
  ///
  /// Calling this again does nothing. Returns the number of values emitted.
  pub fn publish(&mut self) -> usize {
    let mut published = 0;
    for (name, slot) in self.slots.iter_mut() {
      let Some(target) = slot.target.take() else {
        continue;
      };

      if let Some(value) = slot.value.as_ref().and_then(publication_value) {
        match target.push(value) {
          Ok(()) => published += 1,
          Err(e) => debug!(param = %name, error = %e, "shared value not published"),
        }
      }
      target.release();
    }
    published
  }
}

/// The value bound on the target channel: the first element of a
/// collection, and the store path of a file.
fn publication_value(value: &Item) -> Option<Item> {
  match value {
    Item::List(items) => items.first().and_then(publication_value),
    Item::File(file) => Some(Item::Value(serde_json::Value::String(
      file.store_path.to_string_lossy().into_owned(),
    ))),
    Item::Value(_) => Some(value.clone()),
  }
}
