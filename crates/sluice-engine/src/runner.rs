//! Pipeline runner.
//!
//! The `PipelineRunner` validates a [`PipelineDef`], seeds its declared
//! channels, installs one operator per process and waits for all of them to
//! stop. Channels that no process consumes are drained into the result.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use sluice_config::{ChannelDef, ChannelKind, PipelineDef};
use sluice_process::{Item, ProcessDefinition};
use sluice_runtime::{
  CacheStore, ChannelRegistry, ExecutionNotifier, NoopNotifier, OperatorListener, OperatorReport,
  OperatorState, Session, TaskExecutor, TaskProcessor,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::error::EngineError;

/// Outcome of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
  pub session_id: Uuid,
  pub reports: Vec<OperatorReport>,
  /// Items left on channels that no process consumed, by channel name.
  pub channels: BTreeMap<String, Vec<Item>>,
}

impl PipelineResult {
  pub fn report(&self, process: &str) -> Option<&OperatorReport> {
    self.reports.iter().find(|r| r.process == process)
  }
}

/// Runs pipelines within one session.
///
/// # Usage
///
/// ```ignore
/// let session = Arc::new(Session::new(SessionConfig::default()));
/// let runner = PipelineRunner::new(session, Arc::new(LocalExecutor::new()));
///
/// let cancel = CancellationToken::new();
/// let result = runner.run(&pipeline, cancel).await?;
/// ```
pub struct PipelineRunner {
  session: Arc<Session>,
  executor: Arc<dyn TaskExecutor>,
  notifier: Arc<dyn ExecutionNotifier>,
  cache: Option<Arc<dyn CacheStore>>,
  listeners: Vec<Arc<dyn OperatorListener>>,
}

impl PipelineRunner {
  pub fn new(session: Arc<Session>, executor: Arc<dyn TaskExecutor>) -> Self {
    Self {
      session,
      executor,
      notifier: Arc::new(NoopNotifier),
      cache: None,
      listeners: Vec::new(),
    }
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Replace the default filesystem cache store.
  pub fn with_cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
    self.cache = Some(cache);
    self
  }

  /// Attach a listener to every operator.
  pub fn with_listener(mut self, listener: Arc<dyn OperatorListener>) -> Self {
    self.listeners.push(listener);
    self
  }

  pub fn session(&self) -> &Arc<Session> {
    &self.session
  }

  /// Validate every process of `pipeline`.
  pub fn build(pipeline: &PipelineDef) -> Result<Vec<ProcessDefinition>, EngineError> {
    let mut names = HashSet::new();
    for process in &pipeline.processes {
      if !names.insert(process.name.as_str()) {
        return Err(EngineError::InvalidPipeline {
          message: format!("duplicate process '{}'", process.name),
        });
      }
    }

    let mut channels = HashSet::new();
    for channel in &pipeline.channels {
      if !channels.insert(channel.name.as_str()) {
        return Err(EngineError::InvalidPipeline {
          message: format!("duplicate channel '{}'", channel.name),
        });
      }
    }

    pipeline
      .processes
      .iter()
      .map(|def| {
        ProcessDefinition::from_def(def)
          .map(|p| p.with_defaults(pipeline.params.clone()))
          .map_err(EngineError::from)
      })
      .collect()
  }

  /// Run `pipeline` to completion.
  ///
  /// Returns an error if any process was terminated by a failure, or if
  /// `cancel` fired before the pipeline finished.
  #[instrument(
    name = "pipeline_run",
    skip_all,
    fields(pipeline = %pipeline.name, session_id = %self.session.id())
  )]
  pub async fn run(
    &self,
    pipeline: &PipelineDef,
    cancel: CancellationToken,
  ) -> Result<PipelineResult, EngineError> {
    let definitions = Self::build(pipeline)?;

    info!(
      processes = definitions.len(),
      channels = pipeline.channels.len(),
      "starting pipeline"
    );

    let mut registry = ChannelRegistry::new();
    for channel in &pipeline.channels {
      seed(&mut registry, channel)?;
    }

    let run_cancel = cancel.child_token();
    let mut handles = Vec::with_capacity(definitions.len());
    for definition in definitions {
      let mut processor =
        TaskProcessor::new(definition, self.session.clone(), self.executor.clone())
          .with_notifier(self.notifier.clone());
      if let Some(cache) = &self.cache {
        processor = processor.with_cache_store(cache.clone());
      }
      for listener in &self.listeners {
        processor = processor.with_listener(listener.clone());
      }
      handles.push(processor.install(&mut registry, run_cancel.clone())?);
    }

    let unconsumed = registry.seal();

    let reports = join_all(handles.into_iter().map(|h| h.wait()))
      .await
      .into_iter()
      .collect::<Result<Vec<_>, _>>()?;

    let mut channels = BTreeMap::new();
    for receiver in unconsumed {
      let name = receiver.name().to_string();
      channels.insert(name, receiver.collect().await);
    }

    if cancel.is_cancelled() {
      info!("pipeline cancelled");
      return Err(EngineError::Cancelled);
    }

    let failed: Vec<String> = reports
      .iter()
      .filter(|r| r.state == OperatorState::Failed)
      .map(|r| r.process.clone())
      .collect();
    if !failed.is_empty() {
      error!(processes = ?failed, "pipeline failed");
      return Err(EngineError::ProcessFailed { processes: failed });
    }

    info!(
      tasks = reports.iter().map(|r| r.firings).sum::<u64>(),
      "pipeline completed"
    );

    Ok(PipelineResult {
      session_id: *self.session.id(),
      reports,
      channels,
    })
  }
}

fn seed(registry: &mut ChannelRegistry, channel: &ChannelDef) -> Result<(), EngineError> {
  match channel.kind {
    ChannelKind::Value => {
      let item = match channel.items.as_slice() {
        [single] => Item::from_json(single.clone()),
        [] => Item::Value(serde_json::Value::Null),
        many => Item::List(many.iter().cloned().map(Item::from_json).collect()),
      };
      registry.declare_value(channel.name.clone(), item);
    }
    ChannelKind::Queue => {
      let producer = registry.producer(&channel.name)?;
      for value in &channel.items {
        producer.push(Item::from_json(value.clone()))?;
      }
      producer.release();
    }
  }
  Ok(())
}
