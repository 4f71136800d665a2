use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use uuid::Uuid;

/// Settings shared by every operator of a run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
  /// Reuse a previous session id so its cached tasks are found again.
  pub session_id: Option<Uuid>,
  /// Size of the worker pool. Defaults to the number of available cores.
  pub pool_size: Option<usize>,
  pub cache_enabled: bool,
  pub work_dir: PathBuf,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      session_id: None,
      pool_size: None,
      cache_enabled: true,
      work_dir: PathBuf::from("work"),
    }
  }
}

/// A pipeline run.
#[derive(Debug)]
pub struct Session {
  id: Uuid,
  pool_size: usize,
  cache_enabled: bool,
  work_dir: PathBuf,
  workers: Arc<Semaphore>,
}

impl Session {
  pub fn new(config: SessionConfig) -> Self {
    let pool_size = config
      .pool_size
      .filter(|n| *n > 0)
      .unwrap_or_else(default_pool_size);

    Self {
      id: config.session_id.unwrap_or_else(Uuid::new_v4),
      pool_size,
      cache_enabled: config.cache_enabled,
      work_dir: config.work_dir,
      workers: Arc::new(Semaphore::new(pool_size)),
    }
  }

  pub fn id(&self) -> &Uuid {
    &self.id
  }

  pub fn pool_size(&self) -> usize {
    self.pool_size
  }

  pub fn cache_enabled(&self) -> bool {
    self.cache_enabled
  }

  pub fn work_dir(&self) -> &Path {
    &self.work_dir
  }

  /// Worker slots shared by all operators.
  pub(crate) fn workers(&self) -> Arc<Semaphore> {
    self.workers.clone()
  }
}

fn default_pool_size() -> usize {
  std::thread::available_parallelism()
    .map(|n| n.get())
    .unwrap_or(1)
}
