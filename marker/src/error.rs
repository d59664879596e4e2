//! Marker Error Types
//!
//! [`MarkerError`] covers everything that can go wrong while interpreting harness
//! output. The pipeline turns any of these into a diagnostic test result with status
//! `error`, keeping the raw payload.

/// Represents all error types that can occur in the marker system.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarkerError {
    /// The payload is not valid JSON or does not match the result schema.
    #[error("malformed harness output: {0}")]
    MalformedOutput(String),

    /// The payload declares a schema version this parser does not understand.
    #[error("unsupported result schema version {0}")]
    UnsupportedVersion(u32),
}
