//! Traits Module
//!
//! - [`parser`]: the generic trait for turning raw harness output into Rust types.

pub mod parser;
