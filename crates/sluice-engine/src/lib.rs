//! Sluice Pipeline Engine
//!
//! This crate assembles a [`sluice_config::PipelineDef`] into running
//! operators and drives it to completion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PipelineRunner                         │
//! │  - validates processes, applies pipeline params             │
//! │  - seeds declared channels                                  │
//! │  - installs one TaskProcessor per process                   │
//! │  - drains channels nobody consumes into the result          │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TaskProcessor                          │
//! │  - reads input ports, fires tasks, emits outputs            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TaskExecutor                           │
//! │  - runs a prepared task in its work directory               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use sluice_engine::{PipelineRunner, Session, SessionConfig, LocalExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! let session = Arc::new(Session::new(SessionConfig::default()));
//! let runner = PipelineRunner::new(session, Arc::new(LocalExecutor::new()));
//!
//! let cancel = CancellationToken::new();
//! let result = runner.run(&pipeline, cancel).await?;
//! for (channel, items) in &result.channels {
//!     println!("{channel}: {} item(s)", items.len());
//! }
//! ```

mod error;
mod runner;

pub use error::EngineError;
pub use runner::{PipelineResult, PipelineRunner};

// Re-export the pieces needed to configure a run
pub use sluice_runtime::{
  ChannelNotifier, ExecutionEvent, ExecutionNotifier, FsCacheStore, LocalExecutor, NoopNotifier,
  OperatorListener, OperatorReport, OperatorState, Session, SessionConfig, TaskExecutor,
};
