//! Sluice Config
//!
//! This crate contains the serializable declaration types for sluice. These
//! types describe processes and pipelines before they are validated and
//! turned into runtime structures by `sluice-process`.
//!
//! Declarations are loaded from JSON files (via the CLI with
//! `sluice run pipeline.json`) or built programmatically by a front end.

mod channel;
mod enums;
mod input;
mod output;
mod pipeline;
mod process;

pub use channel::{ChannelDef, ChannelKind};
pub use enums::ErrorStrategy;
pub use input::{InputDef, InputType};
pub use output::OutputDef;
pub use pipeline::PipelineDef;
pub use process::{BodyDef, ProcessDef};
