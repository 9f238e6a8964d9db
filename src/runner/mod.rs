//! Benchmark execution.
//!
//! `exec` runs single tool invocations, `dataset` strings them into the
//! per-dataset sequence and `pipeline` schedules that sequence over every
//! dataset.

pub mod dataset;
pub mod exec;
pub mod pipeline;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use pipeline::Pipeline;
