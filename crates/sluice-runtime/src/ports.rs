//! Reading firing tuples off an operator's input ports.
//!
//! One message is taken from every open queue port per round; value ports
//! contribute their item every round. A close sentinel marks its port done
//! and is swallowed. The reader stops only once every queue port is closed.
//! Data that arrives in a round where some other port is already closed
//! cannot complete a tuple and is consumed without firing.
//!
//! An operator with only value ports fires exactly once.

use sluice_process::Item;

use crate::channel::{InputPort, Message};
use crate::lifecycle::Hooks;

pub(crate) enum Next {
  Tuple(Vec<Item>),
  Exhausted,
}

pub(crate) struct PortReader {
  ports: Vec<InputPort>,
  open: Vec<bool>,
  fired: bool,
}

impl PortReader {
  pub fn new(ports: Vec<InputPort>) -> Self {
    let open = ports.iter().map(InputPort::is_queue).collect();
    Self {
      ports,
      open,
      fired: false,
    }
  }

  fn has_queue_ports(&self) -> bool {
    self.ports.iter().any(InputPort::is_queue)
  }

  fn all_closed(&self) -> bool {
    !self.open.iter().any(|o| *o)
  }

  /// Wait for the next complete tuple.
  pub async fn next(&mut self, hooks: Option<&Hooks>) -> Next {
    if !self.has_queue_ports() {
      if self.fired {
        return Next::Exhausted;
      }
      self.fired = true;
      return Next::Tuple(
        self
          .ports
          .iter()
          .filter_map(|p| match p {
            InputPort::Value(item) => Some(item.clone()),
            InputPort::Queue(_) => None,
          })
          .collect(),
      );
    }

    loop {
      if self.all_closed() {
        return Next::Exhausted;
      }

      let mut tuple = Vec::with_capacity(self.ports.len());
      let mut complete = true;

      for (index, port) in self.ports.iter_mut().enumerate() {
        match port {
          InputPort::Value(item) => tuple.push(item.clone()),
          InputPort::Queue(rx) => {
            if !self.open[index] {
              complete = false;
              continue;
            }
            match rx.recv().await {
              Message::Data(item) => {
                if let Some(hooks) = hooks {
                  hooks.on_data_message(index, &item);
                }
                tuple.push(item);
              }
              Message::Close => {
                self.open[index] = false;
                if let Some(hooks) = hooks {
                  hooks.on_control_message(index);
                }
                complete = false;
              }
            }
          }
        }
      }

      if complete {
        self.fired = true;
        return Next::Tuple(tuple);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::channel;
  use serde_json::json;

  fn item(v: serde_json::Value) -> Item {
    Item::from(v)
  }

  async fn drain(reader: &mut PortReader) -> Vec<Vec<Item>> {
    let mut tuples = Vec::new();
    while let Next::Tuple(t) = reader.next(None).await {
      tuples.push(t);
    }
    tuples
  }

  #[tokio::test]
  async fn test_single_port_until_close() {
    let (tx, rx) = channel("a");
    tx.push(item(json!(1))).unwrap();
    tx.push(item(json!(2))).unwrap();
    tx.close();

    let mut reader = PortReader::new(vec![InputPort::Queue(rx)]);
    assert_eq!(
      drain(&mut reader).await,
      vec![vec![item(json!(1))], vec![item(json!(2))]]
    );
  }

  #[tokio::test]
  async fn test_two_ports_stop_after_both_close() {
    let (a_tx, a_rx) = channel("a");
    let (b_tx, b_rx) = channel("b");
    a_tx.push(item(json!(1))).unwrap();
    a_tx.close();
    b_tx.push(item(json!("x"))).unwrap();
    b_tx.push(item(json!("y"))).unwrap();
    b_tx.close();

    let mut reader = PortReader::new(vec![InputPort::Queue(a_rx), InputPort::Queue(b_rx)]);
    assert_eq!(
      drain(&mut reader).await,
      vec![vec![item(json!(1)), item(json!("x"))]]
    );
  }

  #[tokio::test]
  async fn test_value_port_repeats() {
    let (tx, rx) = channel("a");
    tx.push(item(json!(1))).unwrap();
    tx.push(item(json!(2))).unwrap();
    tx.close();

    let mut reader = PortReader::new(vec![
      InputPort::Queue(rx),
      InputPort::Value(item(json!("ref"))),
    ]);
    assert_eq!(
      drain(&mut reader).await,
      vec![
        vec![item(json!(1)), item(json!("ref"))],
        vec![item(json!(2)), item(json!("ref"))]
      ]
    );
  }

  #[tokio::test]
  async fn test_value_ports_only_fire_once() {
    let mut reader = PortReader::new(vec![InputPort::Value(item(json!(1)))]);
    assert_eq!(drain(&mut reader).await, vec![vec![item(json!(1))]]);
  }

  #[tokio::test]
  async fn test_no_ports_fire_once() {
    let mut reader = PortReader::new(vec![]);
    assert_eq!(drain(&mut reader).await, vec![Vec::<Item>::new()]);
  }
}
