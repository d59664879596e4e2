//! Harness result parsing.
//!
//! The harness prints a JSON report; [`parsers::test_run_parser::JsonTestRunParser`]
//! validates it against a strict schema and aggregates marks and status.

pub mod error;
pub mod parsers;
pub mod traits;
pub mod types;

pub use error::MarkerError;
pub use parsers::test_run_parser::JsonTestRunParser;
pub use traits::parser::Parser;
pub use types::{CaseResult, CaseStatus, ParsedTestRun, RunOutcome, ScriptResult};
