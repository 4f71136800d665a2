//! Expansion of "each" inputs.
//!
//! A process with "each" inputs gets a combiner stage in front of it. The
//! combiner reads the raw tuples, expands every tuple into the cartesian
//! product of its "each" collections, and pushes each combination onto one
//! intermediate channel per input position. The task operator then reads
//! those intermediate channels like ordinary queue inputs.

use sluice_process::Item;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::channel::ChannelSender;
use crate::error::RuntimeError;
use crate::ports::{Next, PortReader};

/// Every combination of the collections at `positions`, other positions
/// held fixed.
///
/// The first position varies slowest. A non-collection value at an each
/// position counts as a one-element collection; an empty collection yields
/// no combinations.
pub fn cartesian(tuple: &[Item], positions: &[usize]) -> Vec<Vec<Item>> {
  let mut combinations = vec![tuple.to_vec()];

  for &position in positions {
    let Some(value) = tuple.get(position) else {
      continue;
    };
    let elements = value.elements();

    combinations = combinations
      .into_iter()
      .flat_map(|combination| {
        elements.iter().map(move |element| {
          let mut next = combination.clone();
          next[position] = element.clone();
          next
        })
      })
      .collect();
  }

  combinations
}

/// The combiner stage of one process.
pub(crate) struct Combiner {
  process: String,
  positions: Vec<usize>,
}

impl Combiner {
  pub fn new(process: impl Into<String>, positions: Vec<usize>) -> Self {
    Self {
      process: process.into(),
      positions,
    }
  }

  /// Run until the inputs are exhausted, then close every output.
  pub fn spawn(
    self,
    mut reader: PortReader,
    outputs: Vec<ChannelSender>,
  ) -> JoinHandle<Result<u64, RuntimeError>> {
    tokio::spawn(async move {
      let result = self.run(&mut reader, &outputs).await;
      for output in &outputs {
        output.close();
      }
      if let Err(e) = &result {
        error!(process = %self.process, error = %e, "combiner failed");
      }
      result
    })
  }

  async fn run(
    &self,
    reader: &mut PortReader,
    outputs: &[ChannelSender],
  ) -> Result<u64, RuntimeError> {
    let mut emitted = 0;
    while let Next::Tuple(tuple) = reader.next(None).await {
      if tuple.len() != outputs.len() {
        return Err(RuntimeError::Combiner {
          process: self.process.clone(),
          message: format!("expected {} values, got {}", outputs.len(), tuple.len()),
        });
      }
      for combination in cartesian(&tuple, &self.positions) {
        for (output, item) in outputs.iter().zip(combination) {
          output.push(item)?;
        }
        emitted += 1;
      }
    }
    debug!(process = %self.process, combinations = emitted, "combiner finished");
    Ok(emitted)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::channel::{InputPort, channel};
  use serde_json::json;

  fn item(v: serde_json::Value) -> Item {
    Item::from(v)
  }

  #[test]
  fn test_each_list_against_value() {
    let tuple = vec![item(json!([1, 2])), item(json!("a"))];
    assert_eq!(
      cartesian(&tuple, &[0]),
      vec![
        vec![item(json!(1)), item(json!("a"))],
        vec![item(json!(2)), item(json!("a"))]
      ]
    );
  }

  #[test]
  fn test_first_position_varies_slowest() {
    let tuple = vec![item(json!([1, 2])), item(json!(["x", "y"]))];
    let combos = cartesian(&tuple, &[0, 1]);
    assert_eq!(
      combos,
      vec![
        vec![item(json!(1)), item(json!("x"))],
        vec![item(json!(1)), item(json!("y"))],
        vec![item(json!(2)), item(json!("x"))],
        vec![item(json!(2)), item(json!("y"))]
      ]
    );
  }

  #[test]
  fn test_scalar_each_and_empty_collection() {
    assert_eq!(cartesian(&[item(json!(7))], &[0]), vec![vec![item(json!(7))]]);
    assert!(cartesian(&[item(json!([])), item(json!(1))], &[0]).is_empty());
  }

  #[tokio::test]
  async fn test_combiner_stage_fans_out() {
    let (x_tx, x_rx) = channel("xs");
    x_tx.push(item(json!([1, 2]))).unwrap();
    x_tx.close();

    let (a_tx, a_rx) = channel("p.0");
    let (b_tx, b_rx) = channel("p.1");

    let reader = PortReader::new(vec![InputPort::Queue(x_rx), InputPort::Value(item(json!("a")))]);
    let emitted = Combiner::new("p", vec![0])
      .spawn(reader, vec![a_tx, b_tx])
      .await
      .unwrap()
      .unwrap();

    assert_eq!(emitted, 2);
    assert_eq!(a_rx.collect().await, vec![item(json!(1)), item(json!(2))]);
    assert_eq!(b_rx.collect().await, vec![item(json!("a")), item(json!("a"))]);
  }
}
