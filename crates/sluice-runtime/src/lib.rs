//! Sluice Runtime
//!
//! Turns validated processes into running dataflow operators.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ ChannelRegistry                                              │
//! │  - named queue channels (single consumer, many producers)    │
//! │  - named value channels (read by every firing)               │
//! └──────────────────────────────────────────────────────────────┘
//!          │ input ports                          ▲ output bindings
//!          ▼                                      │
//! ┌──────────────────────────────────────────────────────────────┐
//! │ TaskProcessor (one per process)                              │
//! │  - optional combiner stage for "each" inputs                 │
//! │  - port reader: tuple assembly and close accounting          │
//! │  - per-operator slots + session worker pool                  │
//! │  - input resolution, minijinja rendering, SHA-256 cache key  │
//! │  - CacheStore lookup, TaskExecutor submission                │
//! │  - output collection with standard/flatten/combine modes     │
//! │  - shared values captured once, published on stop           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod channel;
mod combiner;
mod error;
mod events;
mod executor;
mod lifecycle;
mod operator;
mod outputs;
mod ports;
mod render;
mod resolve;
mod session;
mod shared;
mod task;

pub use cache::{CacheKey, CacheStore, FsCacheStore};
pub use channel::{ChannelReceiver, ChannelRegistry, ChannelSender, InputPort, Message};
pub use combiner::cartesian;
pub use error::RuntimeError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use executor::{
  COMMAND_SCRIPT, EXIT_CODE_FILE, LocalExecutor, STDERR_FILE, STDOUT_FILE, TaskExecutor,
  TaskOutcome,
};
pub use lifecycle::{ErrorPolicy, FiringContext, HookError, OperatorListener, OperatorState};
pub use operator::{OperatorHandle, OperatorReport, TaskProcessor, concurrency_width};
pub use render::{MinijinjaRenderer, ScriptRenderer};
pub use session::{Session, SessionConfig};
pub use shared::SharedRegistry;
pub use task::{TaskContext, TaskRun, TaskStatus};
