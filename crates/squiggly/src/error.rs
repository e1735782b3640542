//! Error and Result types for Squiggly operations.

use thiserror::Error;

/// A convenience `Result` type for Squiggly operations.
pub type Result<T> = std::result::Result<T, SquigglyError>;

/// The error type for index, filter and view operations.
#[derive(Debug, Error)]
pub enum SquigglyError {
    /// Filter operator is not one of `==`, `!=`, `~`, `!~`, `*`, `!*`.
    #[error("Unrecognized filter operator: {0:?}")]
    UnknownOperator(String),

    /// A regex filter value failed to compile.
    #[error("Invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The pattern as supplied by the caller.
        pattern: String,
        /// Underlying regex compilation error.
        #[source]
        source: regex::Error,
    },

    /// A list of values was supplied to an operator that only takes one.
    #[error("Received multiple values for non-regex filter {param:?} {op}")]
    MultipleValues {
        /// Search parameter of the rejected filter.
        param: String,
        /// Operator label of the rejected filter.
        op: String,
    },

    /// No filter item exists for the given search parameter.
    #[error("Unknown filter key: {0:?}")]
    UnknownFilter(String),

    /// The trie arena is in a state that contradicts its own links.
    #[error("Trie consistency violation: {0}")]
    TrieInconsistency(String),

    /// Configuration values are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
