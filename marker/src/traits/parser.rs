//! Parser Trait
//!
//! [`Parser`] is the generic interface for turning raw harness output into
//! strongly-typed Rust structures. Implementations validate the input and return a
//! [`MarkerError`] instead of panicking on unexpected shapes.
//!
//! # Example
//!
//! ```rust
//! use marker::error::MarkerError;
//! use marker::traits::parser::Parser;
//!
//! struct LineCount;
//!
//! impl<'a> Parser<&'a str, usize> for LineCount {
//!     fn parse(&self, raw: &'a str) -> Result<usize, MarkerError> {
//!         if raw.is_empty() {
//!             return Err(MarkerError::MalformedOutput("empty".into()));
//!         }
//!         Ok(raw.lines().count())
//!     }
//! }
//! ```

use crate::error::MarkerError;

/// A generic trait for parsing data into a strongly-typed Rust structure.
///
/// # Type Parameters
///
/// * `Input` - The input type to be parsed.
/// * `Output` - The output type produced by the parser.
pub trait Parser<Input, Output> {
    /// Parse an input value into the target type.
    ///
    /// # Errors
    ///
    /// Returns a [`MarkerError`] if the input does not conform to the expected schema.
    fn parse(&self, input: Input) -> Result<Output, MarkerError>;
}
