//! Input and output parameter descriptors.

mod input;
mod output;
mod pattern;

pub use input::{InputKind, InputParam};
pub use output::{OutputKind, OutputMode, OutputParam};
pub use pattern::{PatternError, expand_file_names, glob_match};

pub(crate) use input::build_inputs;
pub(crate) use output::build_outputs;
