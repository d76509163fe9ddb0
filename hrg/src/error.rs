//! Error taxonomy shared by every fallible operation in the crate.

/// Errors raised by the HRG core.
///
/// A rejected Monte Carlo move is never an error; it is reported through
/// the boolean returned by [`crate::Dendrogram::monte_carlo_move`].
#[derive(Debug, thiserror::Error)]
pub enum HrgError {
    /// A structure does not match the reference graph (e.g. leaf set
    /// differs from the graph's node set) or an argument is out of range.
    #[error("validation error: {0}")]
    Validation(String),

    /// A persisted topology is malformed.
    #[error("format error: {0}")]
    Format(String),

    /// Histograms or node lists that must agree do not.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Internal bookkeeping broke. Always fatal.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<serde_json::Error> for HrgError {
    fn from(e: serde_json::Error) -> Self {
        HrgError::Format(e.to_string())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, HrgError>;
