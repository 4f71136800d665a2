//! The task operator.
//!
//! A [`TaskProcessor`] turns a [`ProcessDefinition`] into a running
//! operator. Each firing goes through these steps:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ operator loop (owns the shared registry)                    │
//! │  1. acquire an operator slot                                │
//! │  2. read a tuple off the input ports                        │
//! │  3. acquire a session worker                                │
//! │  4. before_firing: assign the task index                    │
//! │  5. resolve inputs, render the script, compute the hash     │
//! └──────────────────────────┬──────────────────────────────────┘
//!                            ▼ spawned, holding slot + worker
//! ┌─────────────────────────────────────────────────────────────┐
//! │  6. cache lookup, or prepare the work dir and execute       │
//! │  7. collect and emit outputs                                │
//! │  8. on_exception on any error, then after_firing            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! When the inputs are exhausted the operator waits for in-flight firings,
//! publishes shared values, releases its output channels and stops.

use std::sync::Arc;

use serde::Serialize;
use sluice_process::{Item, ProcessBody, ProcessDefinition};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::{CacheKey, CacheStore, FsCacheStore};
use crate::channel::{ChannelRegistry, InputPort, channel};
use crate::combiner::Combiner;
use crate::error::RuntimeError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::executor::{STDOUT_FILE, TaskExecutor};
use crate::lifecycle::{ErrorPolicy, FiringContext, Hooks, OperatorListener, OperatorState};
use crate::outputs::{OutputBinding, bind_outputs};
use crate::ports::{Next, PortReader};
use crate::render::{MinijinjaRenderer, ScriptRenderer};
use crate::resolve::resolve_inputs;
use crate::session::Session;
use crate::shared::SharedRegistry;
use crate::task::{TaskRun, TaskStatus};

/// Work directory attempts per task before giving up.
const MAX_WORK_DIR_ATTEMPTS: u32 = 100;

/// Maximum number of concurrent firings of `definition`.
///
/// A process with shared inputs runs one firing at a time; otherwise the
/// process's `max_forks` applies, falling back to the session pool size.
pub fn concurrency_width(definition: &ProcessDefinition, pool_size: usize) -> usize {
  if definition.has_shared_inputs() {
    return 1;
  }
  definition
    .config
    .max_forks
    .filter(|n| *n > 0)
    .unwrap_or(pool_size)
    .max(1)
}

/// Builds and installs the operator of one process.
pub struct TaskProcessor {
  definition: Arc<ProcessDefinition>,
  session: Arc<Session>,
  executor: Arc<dyn TaskExecutor>,
  cache: Arc<dyn CacheStore>,
  renderer: Arc<dyn ScriptRenderer>,
  notifier: Arc<dyn ExecutionNotifier>,
  listeners: Vec<Arc<dyn OperatorListener>>,
  defaults: Arc<serde_json::Map<String, serde_json::Value>>,
}

impl TaskProcessor {
  pub fn new(
    definition: ProcessDefinition,
    session: Arc<Session>,
    executor: Arc<dyn TaskExecutor>,
  ) -> Self {
    let defaults = Arc::new(definition.config.defaults.clone());
    let cache = Arc::new(FsCacheStore::new(session.work_dir()));
    Self {
      definition: Arc::new(definition),
      session,
      executor,
      cache,
      renderer: Arc::new(MinijinjaRenderer::new()),
      notifier: Arc::new(NoopNotifier),
      listeners: Vec::new(),
      defaults,
    }
  }

  pub fn with_cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
    self.cache = cache;
    self
  }

  pub fn with_renderer(mut self, renderer: Arc<dyn ScriptRenderer>) -> Self {
    self.renderer = renderer;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn ExecutionNotifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_listener(mut self, listener: Arc<dyn OperatorListener>) -> Self {
    self.listeners.push(listener);
    self
  }

  pub fn definition(&self) -> &ProcessDefinition {
    &self.definition
  }

  pub fn concurrency_width(&self) -> usize {
    concurrency_width(&self.definition, self.session.pool_size())
  }

  /// Wire the operator into `registry` and start it.
  ///
  /// Input channels are taken from the registry and output channels are
  /// attached to it (both created on first reference). If an error
  /// terminates the operator, `cancel` is cancelled so the rest of the
  /// pipeline stops too.
  #[instrument(name = "operator_install", skip_all, fields(process = %self.definition.name))]
  pub fn install(
    self,
    registry: &mut ChannelRegistry,
    cancel: CancellationToken,
  ) -> Result<OperatorHandle, RuntimeError> {
    let name = self.definition.name.clone();

    let mut ports = Vec::with_capacity(self.definition.inputs.len());
    for param in &self.definition.inputs {
      ports.push(registry.take_port(&param.source)?);
    }

    let mut bindings = Vec::with_capacity(self.definition.outputs.len());
    for param in &self.definition.outputs {
      bindings.push(OutputBinding {
        param: param.clone(),
        sender: registry.producer(param.channel_name())?,
      });
    }

    let mut shared = SharedRegistry::new();
    for param in self.definition.shared_inputs() {
      let target = param
        .into_target()
        .map(|t| registry.producer(t))
        .transpose()?;
      shared.register(&param.name, target);
    }

    let combiner = if self.definition.has_each_inputs() {
      let mut senders = Vec::with_capacity(ports.len());
      let mut expanded = Vec::with_capacity(ports.len());
      for index in 0..ports.len() {
        let (tx, rx) = channel(format!("{}.each.{}", name, index));
        senders.push(tx);
        expanded.push(InputPort::Queue(rx));
      }
      let raw = std::mem::replace(&mut ports, expanded);
      let combiner = Combiner::new(&name, self.definition.each_positions());
      Some(combiner.spawn(PortReader::new(raw), senders))
    } else {
      None
    };

    let mut listeners: Vec<Arc<dyn OperatorListener>> =
      vec![Arc::new(ErrorPolicy::new(self.definition.config.error_strategy))];
    listeners.extend(self.listeners.iter().cloned());
    let hooks = Hooks::new(&name, listeners);

    let (state_tx, state_rx) = watch::channel(OperatorState::Idle);
    let run = OperatorRun {
      reader: PortReader::new(ports),
      bindings: Arc::new(bindings),
      shared,
      hooks,
      combiner,
      state: state_tx,
      terminate: cancel.child_token(),
      pipeline: cancel,
    };

    debug!(width = self.concurrency_width(), "operator installed");
    let handle = tokio::spawn(Arc::new(self).run(run));

    Ok(OperatorHandle {
      process: name,
      state: state_rx,
      handle,
    })
  }

  #[instrument(name = "operator", skip_all, fields(process = %self.definition.name))]
  async fn run(self: Arc<Self>, mut run: OperatorRun) -> OperatorReport {
    let width = self.concurrency_width();
    let slots = Arc::new(Semaphore::new(width));
    let workers = self.session.workers();
    let mut in_flight: JoinSet<FiringResult> = JoinSet::new();
    let mut report = OperatorReport::new(run.hooks.process());

    let _ = run.state.send(OperatorState::Running);
    info!(process = %self.definition.name, width, "operator started");

    loop {
      let slot = tokio::select! {
        biased;
        _ = run.terminate.cancelled() => break,
        permit = slots.clone().acquire_owned() => match permit {
          Ok(permit) => permit,
          Err(_) => break,
        },
      };

      let tuple = tokio::select! {
        biased;
        _ = run.terminate.cancelled() => break,
        next = run.reader.next(Some(&run.hooks)) => match next {
          Next::Tuple(tuple) => tuple,
          Next::Exhausted => break,
        },
      };

      let worker = tokio::select! {
        biased;
        _ = run.terminate.cancelled() => break,
        permit = workers.clone().acquire_owned() => match permit {
          Ok(permit) => permit,
          Err(_) => break,
        },
      };

      let ctx = match run.hooks.before_firing() {
        Ok(ctx) => ctx,
        Err(e) => {
          error!(process = %self.definition.name, error = %e, "before_firing failed");
          report.terminated = true;
          run.pipeline.cancel();
          break;
        }
      };

      match self.prepare(&ctx, &tuple, &mut run.shared) {
        Ok(task) => {
          let processor = self.clone();
          let hooks = run.hooks.clone();
          let bindings = run.bindings.clone();
          let pipeline = run.pipeline.clone();
          in_flight.spawn(async move {
            let result = processor.complete(ctx, task, &bindings, &hooks, &pipeline).await;
            drop((slot, worker));
            result
          });
        }
        Err(e) => {
          let result = self.fail(&ctx, e, None, &run.hooks, &run.pipeline);
          report.record(result);
        }
      }

      while let Some(joined) = in_flight.try_join_next() {
        report.record_join(joined);
      }
    }

    while let Some(joined) = in_flight.join_next().await {
      report.record_join(joined);
    }

    if let Some(combiner) = run.combiner.take() {
      if run.terminate.is_cancelled() {
        combiner.abort();
      }
      match combiner.await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
          error!(process = %self.definition.name, error = %e, "combiner stopped the operator");
          report.terminated = true;
          run.pipeline.cancel();
        }
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!(process = %self.definition.name, error = %e, "combiner panicked"),
      }
    }

    self.stop(&mut run, &mut report);
    report
  }

  fn stop(&self, run: &mut OperatorRun, report: &mut OperatorReport) {
    let published = run.shared.publish();
    for binding in run.bindings.iter() {
      binding.sender.release();
    }
    run.hooks.after_stop();

    report.firings = run.hooks.firings();
    report.state = if report.terminated {
      OperatorState::Failed
    } else if run.terminate.is_cancelled() {
      OperatorState::Stopped
    } else {
      OperatorState::Completed
    };
    let _ = run.state.send(report.state);

    self.notifier.notify(ExecutionEvent::ProcessTerminated {
      process: self.definition.name.clone(),
      firings: report.firings,
    });
    info!(
      process = %self.definition.name,
      state = ?report.state,
      firings = report.firings,
      failed = report.failed,
      published,
      "operator stopped"
    );
  }

  /// Bind inputs, render the body and compute the cache key.
  fn prepare(
    &self,
    ctx: &FiringContext,
    tuple: &[Item],
    shared: &mut SharedRegistry,
  ) -> Result<TaskRun, RuntimeError> {
    let name = &self.definition.name;
    let mut task = TaskRun::new(name, ctx.task_index, self.defaults.clone());

    resolve_inputs(&self.definition, tuple, &mut task, shared)?;

    match &self.definition.body {
      ProcessBody::Template(template) => {
        task.script = self.renderer.render(name, template, &task.context)?;
      }
      ProcessBody::Native { source } => {
        task.script = source.clone();
        task.native = true;
      }
    }

    task.hash = Some(CacheKey::compute(
      self.session.id(),
      name,
      &task.script,
      &task.inputs,
    ));
    Ok(task)
  }

  #[instrument(
    name = "task",
    skip_all,
    fields(process = %ctx.process, task_index = ctx.task_index)
  )]
  async fn complete(
    &self,
    ctx: FiringContext,
    mut task: TaskRun,
    bindings: &[OutputBinding],
    hooks: &Hooks,
    pipeline: &CancellationToken,
  ) -> FiringResult {
    let result = match self.execute(&mut task).await {
      Ok(()) => bind_outputs(bindings, &task).await,
      Err(e) => Err(e),
    };

    if let Err(e) = result {
      return self.fail(&ctx, e, Some(&task), hooks, pipeline);
    }

    let work_dir = task
      .work_dir
      .as_deref()
      .map(|d| d.to_string_lossy().into_owned())
      .unwrap_or_default();
    let cached = task.status == TaskStatus::Cached;
    self.notifier.notify(if cached {
      ExecutionEvent::TaskCached {
        process: ctx.process.clone(),
        task_index: ctx.task_index,
        work_dir,
      }
    } else {
      ExecutionEvent::TaskCompleted {
        process: ctx.process.clone(),
        task_index: ctx.task_index,
        work_dir,
      }
    });

    if let Err(e) = hooks.after_firing(&ctx, Some(&task)) {
      error!(error = %e, "after_firing failed");
      pipeline.cancel();
      return FiringResult::Failed { terminate: true };
    }

    if cached {
      FiringResult::Cached
    } else {
      FiringResult::Completed
    }
  }

  /// Reuse a cached result or run the task.
  ///
  /// Work directories are claimed with an exclusive create. When the key's
  /// directory already exists and holds no valid result (another firing
  /// with the same key is running, or an earlier run failed there), the
  /// next attempt key is tried.
  async fn execute(&self, task: &mut TaskRun) -> Result<(), RuntimeError> {
    let Some(base_key) = task.hash.clone() else {
      return Err(RuntimeError::Executor {
        task: task.name(),
        message: "task has no cache key".to_string(),
      });
    };
    let use_cache = self.definition.config.cache && self.session.cache_enabled();

    let mut claimed = None;
    for attempt in 0..MAX_WORK_DIR_ATTEMPTS {
      let key = base_key.attempt(attempt);

      if use_cache && self.reuse_cached(task, &key).await? {
        task.hash = Some(key);
        return Ok(());
      }

      let dir = key.work_dir(self.session.work_dir());
      if let Some(parent) = dir.parent() {
        tokio::fs::create_dir_all(parent)
          .await
          .map_err(|e| RuntimeError::io(parent, e))?;
      }
      match tokio::fs::create_dir(&dir).await {
        Ok(()) => {
          claimed = Some((key, dir));
          break;
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
          debug!(work_dir = %dir.display(), attempt, "work directory taken");
        }
        Err(e) => return Err(RuntimeError::io(&dir, e)),
      }
    }

    let Some((key, dir)) = claimed else {
      return Err(RuntimeError::Executor {
        task: task.name(),
        message: format!("no free work directory after {} attempts", MAX_WORK_DIR_ATTEMPTS),
      });
    };

    task.hash = Some(key.clone());
    task.work_dir = Some(dir);
    task.status = TaskStatus::Submitted;
    info!(hash = %key, "task submitted");
    self.notifier.notify(ExecutionEvent::TaskStarted {
      process: task.process.clone(),
      task_index: task.index,
      hash: key.to_string(),
    });

    let outcome = self.executor.submit(task).await?;
    task.exit_status = Some(outcome.exit_status);
    task.stdout = outcome.stdout;

    if outcome.exit_status != 0 {
      task.status = TaskStatus::Failed;
      return Err(RuntimeError::TaskFailed {
        task: task.name(),
        exit_status: outcome.exit_status,
      });
    }

    task.status = TaskStatus::Succeeded;
    info!(exit_status = outcome.exit_status, "task completed");
    Ok(())
  }

  /// Bind a cached result of `key` onto `task`, if a valid one exists.
  async fn reuse_cached(&self, task: &mut TaskRun, key: &CacheKey) -> Result<bool, RuntimeError> {
    let Some(dir) = self.cache.lookup(key).await? else {
      return Ok(false);
    };
    if !self.cache.has_valid_outputs(&dir, &self.definition.outputs).await? {
      return Ok(false);
    }

    if self.definition.outputs.iter().any(|o| o.uses_stdout()) {
      let path = dir.join(STDOUT_FILE);
      task.stdout = Some(
        tokio::fs::read_to_string(&path)
          .await
          .map_err(|e| RuntimeError::io(&path, e))?,
      );
    }
    info!(hash = %key, work_dir = %dir.display(), "task cached");
    task.work_dir = Some(dir);
    task.status = TaskStatus::Cached;
    Ok(true)
  }

  fn fail(
    &self,
    ctx: &FiringContext,
    err: RuntimeError,
    task: Option<&TaskRun>,
    hooks: &Hooks,
    pipeline: &CancellationToken,
  ) -> FiringResult {
    error!(
      process = %ctx.process,
      task_index = ctx.task_index,
      error = %err,
      "task failed"
    );
    self.notifier.notify(ExecutionEvent::TaskFailed {
      process: ctx.process.clone(),
      task_index: ctx.task_index,
      error: err.to_string(),
    });

    let mut terminate = hooks.on_exception(ctx, &err);
    if let Err(e) = hooks.after_firing(ctx, task) {
      error!(process = %ctx.process, error = %e, "after_firing failed");
      terminate = true;
    }
    if terminate {
      pipeline.cancel();
    }
    FiringResult::Failed { terminate }
  }
}

/// Per-run state moved into the operator task.
struct OperatorRun {
  reader: PortReader,
  bindings: Arc<Vec<OutputBinding>>,
  shared: SharedRegistry,
  hooks: Hooks,
  combiner: Option<JoinHandle<Result<u64, RuntimeError>>>,
  state: watch::Sender<OperatorState>,
  /// Stops this operator only.
  terminate: CancellationToken,
  /// Stops the whole pipeline.
  pipeline: CancellationToken,
}

enum FiringResult {
  Completed,
  Cached,
  Failed { terminate: bool },
}

/// Summary of a stopped operator.
#[derive(Debug, Clone, Serialize)]
pub struct OperatorReport {
  pub process: String,
  pub state: OperatorState,
  pub firings: u64,
  pub completed: u64,
  pub cached: u64,
  pub failed: u64,
  /// Whether an error terminated the operator.
  pub terminated: bool,
}

impl OperatorReport {
  fn new(process: &str) -> Self {
    Self {
      process: process.to_string(),
      state: OperatorState::Idle,
      firings: 0,
      completed: 0,
      cached: 0,
      failed: 0,
      terminated: false,
    }
  }

  fn record(&mut self, result: FiringResult) {
    match result {
      FiringResult::Completed => self.completed += 1,
      FiringResult::Cached => self.cached += 1,
      FiringResult::Failed { terminate } => {
        self.failed += 1;
        self.terminated |= terminate;
      }
    }
  }

  fn record_join(&mut self, joined: Result<FiringResult, tokio::task::JoinError>) {
    match joined {
      Ok(result) => self.record(result),
      Err(e) => {
        error!(process = %self.process, error = %e, "firing panicked");
        self.record(FiringResult::Failed { terminate: true });
      }
    }
  }
}

/// A running operator.
pub struct OperatorHandle {
  process: String,
  state: watch::Receiver<OperatorState>,
  handle: JoinHandle<OperatorReport>,
}

impl OperatorHandle {
  pub fn process(&self) -> &str {
    &self.process
  }

  pub fn state(&self) -> OperatorState {
    *self.state.borrow()
  }

  /// Wait for the operator to stop.
  pub async fn wait(self) -> Result<OperatorReport, RuntimeError> {
    self.handle.await.map_err(|e| RuntimeError::Join {
      process: self.process,
      message: e.to_string(),
    })
  }
}
