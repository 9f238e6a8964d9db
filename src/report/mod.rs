//! Report generation and persisted tables.

pub mod csv;
pub mod generator;

pub use generator::*;
