//! Dataflow channels.
//!
//! A queue channel is an unbounded FIFO of [`Message`]s with a single
//! consumer. Producers push data and eventually release their hold on the
//! channel; when the last producer lets go a single `Close` message is sent.
//! Once closed a channel never accepts data again.
//!
//! A value channel holds one item that every consumer reads on every firing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sluice_process::Item;
use tokio::sync::mpsc;

use crate::error::RuntimeError;

/// What travels on a queue channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
  Data(Item),
  /// End-of-stream sentinel.
  Close,
}

#[derive(Debug)]
struct ChannelState {
  closed: Mutex<bool>,
  producers: AtomicUsize,
}

/// The producing half of a queue channel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
  name: Arc<str>,
  tx: mpsc::UnboundedSender<Message>,
  state: Arc<ChannelState>,
}

/// The consuming half of a queue channel.
#[derive(Debug)]
pub struct ChannelReceiver {
  name: Arc<str>,
  rx: mpsc::UnboundedReceiver<Message>,
}

/// Create a new queue channel.
pub fn channel(name: impl Into<String>) -> (ChannelSender, ChannelReceiver) {
  let name: Arc<str> = Arc::from(name.into());
  let (tx, rx) = mpsc::unbounded_channel();
  let sender = ChannelSender {
    name: name.clone(),
    tx,
    state: Arc::new(ChannelState {
      closed: Mutex::new(false),
      producers: AtomicUsize::new(0),
    }),
  };
  (sender, ChannelReceiver { name, rx })
}

impl ChannelSender {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Push an item. Fails once the channel is closed.
  pub fn push(&self, item: Item) -> Result<(), RuntimeError> {
    let closed = self.state.closed.lock().unwrap_or_else(|e| e.into_inner());
    if *closed {
      return Err(RuntimeError::ChannelClosed {
        channel: self.name.to_string(),
      });
    }
    // A dropped receiver means nobody reads this channel any more.
    let _ = self.tx.send(Message::Data(item));
    Ok(())
  }

  /// Close the channel. Returns `true` if this call sent the sentinel.
  pub fn close(&self) -> bool {
    let mut closed = self.state.closed.lock().unwrap_or_else(|e| e.into_inner());
    if *closed {
      return false;
    }
    *closed = true;
    let _ = self.tx.send(Message::Close);
    true
  }

  pub fn is_closed(&self) -> bool {
    *self.state.closed.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Register a new producer and return its handle.
  pub fn attach(&self) -> ChannelSender {
    self.state.producers.fetch_add(1, Ordering::SeqCst);
    self.clone()
  }

  /// Drop one producer's hold; the last one closes the channel.
  pub fn release(&self) -> bool {
    let previous = self
      .state
      .producers
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .unwrap_or(0);
    if previous <= 1 {
      return self.close();
    }
    false
  }
}

impl ChannelReceiver {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Wait for the next message. A channel whose senders are all gone reads
  /// as closed.
  pub async fn recv(&mut self) -> Message {
    self.rx.recv().await.unwrap_or(Message::Close)
  }

  /// Read every item up to the close sentinel.
  pub async fn collect(mut self) -> Vec<Item> {
    let mut items = Vec::new();
    while let Message::Data(item) = self.recv().await {
      items.push(item);
    }
    items
  }
}

/// One input of an operator.
#[derive(Debug)]
pub enum InputPort {
  Queue(ChannelReceiver),
  /// Re-read on every firing; never terminates the operator.
  Value(Item),
}

impl InputPort {
  pub fn is_queue(&self) -> bool {
    matches!(self, InputPort::Queue(_))
  }
}

#[derive(Debug)]
enum ChannelEntry {
  Queue {
    sender: ChannelSender,
    receiver: Option<ChannelReceiver>,
  },
  Value(Item),
}

/// Named channels of a pipeline.
///
/// Channels are created lazily on first reference, by either a producer or
/// a consumer.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
  channels: HashMap<String, ChannelEntry>,
}

impl ChannelRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.channels.contains_key(name)
  }

  /// Declare a value channel holding `item`.
  pub fn declare_value(&mut self, name: impl Into<String>, item: Item) {
    self.channels.insert(name.into(), ChannelEntry::Value(item));
  }

  fn entry(&mut self, name: &str) -> &mut ChannelEntry {
    self.channels.entry(name.to_string()).or_insert_with(|| {
      let (sender, receiver) = channel(name);
      ChannelEntry::Queue {
        sender,
        receiver: Some(receiver),
      }
    })
  }

  /// Attach a producer to the named queue channel.
  pub fn producer(&mut self, name: &str) -> Result<ChannelSender, RuntimeError> {
    match self.entry(name) {
      ChannelEntry::Queue { sender, .. } => Ok(sender.attach()),
      ChannelEntry::Value(_) => Err(RuntimeError::ChannelClosed {
        channel: name.to_string(),
      }),
    }
  }

  /// Take the consumer side of the named channel.
  ///
  /// Value channels can be read by any number of operators; a queue channel
  /// has exactly one consumer.
  pub fn take_port(&mut self, name: &str) -> Result<InputPort, RuntimeError> {
    match self.entry(name) {
      ChannelEntry::Value(item) => Ok(InputPort::Value(item.clone())),
      ChannelEntry::Queue { receiver, .. } => receiver
        .take()
        .map(InputPort::Queue)
        .ok_or_else(|| RuntimeError::ChannelConsumed {
          channel: name.to_string(),
        }),
    }
  }

  /// Finish wiring. Channels nobody produces into become closed, and the
  /// receivers nobody consumed are handed back.
  pub fn seal(self) -> Vec<ChannelReceiver> {
    let mut unconsumed: Vec<ChannelReceiver> = self
      .channels
      .into_values()
      .filter_map(|entry| match entry {
        ChannelEntry::Queue { receiver, .. } => receiver,
        ChannelEntry::Value(_) => None,
      })
      .collect();
    unconsumed.sort_by(|a, b| a.name.cmp(&b.name));
    unconsumed
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_push_then_close() {
    let (tx, mut rx) = channel("numbers");
    tx.push(Item::from(json!(1))).unwrap();
    tx.push(Item::from(json!(2))).unwrap();
    assert!(tx.close());
    assert!(!tx.close());

    assert_eq!(rx.recv().await, Message::Data(Item::from(json!(1))));
    assert_eq!(rx.recv().await, Message::Data(Item::from(json!(2))));
    assert_eq!(rx.recv().await, Message::Close);
  }

  #[tokio::test]
  async fn test_push_after_close_fails() {
    let (tx, _rx) = channel("numbers");
    tx.close();
    let err = tx.push(Item::from(json!(1))).unwrap_err();
    assert!(matches!(err, RuntimeError::ChannelClosed { .. }));
  }

  #[tokio::test]
  async fn test_last_producer_closes() {
    let (tx, rx) = channel("shared");
    let a = tx.attach();
    let b = tx.attach();

    a.push(Item::from(json!("a"))).unwrap();
    assert!(!a.release());
    assert!(!tx.is_closed());

    b.push(Item::from(json!("b"))).unwrap();
    assert!(b.release());

    assert_eq!(rx.collect().await, vec![Item::from(json!("a")), Item::from(json!("b"))]);
  }

  #[tokio::test]
  async fn test_dropped_senders_read_as_close() {
    let (tx, mut rx) = channel("orphan");
    drop(tx);
    assert_eq!(rx.recv().await, Message::Close);
  }

  #[tokio::test]
  async fn test_registry_single_consumer() {
    let mut registry = ChannelRegistry::new();
    let producer = registry.producer("out").unwrap();
    assert!(registry.take_port("out").unwrap().is_queue());

    let err = registry.take_port("out").unwrap_err();
    assert!(matches!(err, RuntimeError::ChannelConsumed { .. }));

    producer.push(Item::from(json!(7))).unwrap();
    producer.release();
  }

  #[tokio::test]
  async fn test_registry_value_channel_is_shared() {
    let mut registry = ChannelRegistry::new();
    registry.declare_value("genome", Item::from(json!("hg38")));

    for _ in 0..2 {
      match registry.take_port("genome").unwrap() {
        InputPort::Value(item) => assert_eq!(item, Item::from(json!("hg38"))),
        other => panic!("expected value port, got {:?}", other),
      }
    }
  }

  #[tokio::test]
  async fn test_seal_returns_unconsumed() {
    let mut registry = ChannelRegistry::new();
    let results = registry.producer("results").unwrap();
    let _ = registry.take_port("consumed").unwrap();

    results.push(Item::from(json!("done"))).unwrap();
    results.release();

    let unconsumed = registry.seal();
    assert_eq!(unconsumed.len(), 1);
    assert_eq!(unconsumed[0].name(), "results");

    let receiver = unconsumed.into_iter().next().unwrap();
    assert_eq!(receiver.collect().await, vec![Item::from(json!("done"))]);
  }
}
