//! Sluice Process
//!
//! This crate provides the validated process representation for sluice.
//! A [`ProcessDefinition`] is built once from a [`sluice_config::ProcessDef`]
//! when the pipeline is assembled and is read-only afterwards.
//!
//! Key differences from `sluice-config`:
//! - Parameters carry their positional index and a closed variant set
//! - Output modes are validated against each output type
//! - Output sets own their inner parameters in a private index scope
//! - Channel values are typed as [`Item`]s (plain values, files, lists)

mod definition;
mod error;
mod item;
mod param;

pub use definition::{ProcessBody, ProcessConfig, ProcessDefinition};
pub use error::DeclarationError;
pub use item::{FileHolder, Item};
pub use param::{
  InputKind, InputParam, OutputKind, OutputMode, OutputParam, PatternError, expand_file_names,
  glob_match,
};
pub use sluice_config::ErrorStrategy;
