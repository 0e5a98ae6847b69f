//! CLI module

mod commands;
mod progress;

pub use commands::{Cli, Commands, execute};
pub use progress::ProgressReporter;
