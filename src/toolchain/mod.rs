//! External tool command lines.

pub mod builder;
pub mod command;

pub use builder::{AnalyzerInvocation, AnnotatorFiles, CommandBuilder};
pub use command::CommandSpec;
