//! # Parsers
//!
//! - [`test_run_parser`]: parses the structured report emitted by the test harness.

pub mod test_run_parser;
