//! Error types for grouped matmul dispatch
//!
//! Every failure in this crate is terminal for the call that produced it:
//! there are no retry or partial-success semantics. Precondition violations
//! surface as structured errors before any engine work is submitted;
//! per-group stride inconsistencies discovered inside the engine are fatal
//! aborts, not recoverable errors (see `engine` module docs).

use thiserror::Error;

/// Result type for all agrupar operations
pub type Result<T> = std::result::Result<T, AgruparError>;

/// Errors reported at the dispatch boundary
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgruparError {
    /// A required input buffer or metadata sequence was empty
    #[error("empty input '{arg}': at least one group is required")]
    EmptyInput {
        /// Name of the offending argument
        arg: &'static str,
    },

    /// A shape or metadata length is inconsistent with the declared problem
    #[error("invalid shape: {reason}")]
    InvalidShape {
        /// Description of the inconsistency
        reason: String,
    },

    /// Expert offsets do not partition the stacked activation rows
    #[error(
        "partition mismatch: expert offsets cover {covered} rows, \
         stacked activations have {rows}"
    )]
    PartitionMismatch {
        /// Rows covered by `offsets[G] - offsets[0]`
        covered: usize,
        /// Total rows of the stacked activation buffer
        rows: usize,
    },

    /// A per-group row count disagrees with the declared problem size
    #[error(
        "group {group}: offsets span {span} rows but problem size declares m={m}"
    )]
    GroupRowMismatch {
        /// Group index
        group: usize,
        /// `offsets[group + 1] - offsets[group]`
        span: usize,
        /// Declared `M_i` for the group
        m: usize,
    },
}
