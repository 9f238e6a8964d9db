//! Analysis modules.
//!
//! Log parsing on the way in, aggregation on the way out.

pub mod aggregator;
pub mod parser;

pub use aggregator::*;
pub use parser::{LogParser, DEFAULT_ERROR_PATTERN};
