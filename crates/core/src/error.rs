//! Error taxonomy shared across ingestion and query paths.

use thiserror::Error;

/// Operational errors surfaced to callers.
///
/// Duplicate-key collisions on the chain's unique index are deliberately
/// not represented here: they are the retry signal inside the append
/// pipeline and never escape it.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed JSON body or record. Maps to HTTP 422.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Any query DSL or sort specification violation. Maps to HTTP 422.
    #[error("bad query: {0}")]
    BadQuery(String),

    /// Store unreachable, iteration failure, or a non-duplicate insert
    /// error. Maps to HTTP 500.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invariant breach or recovered panic. Maps to HTTP 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn bad_input(msg: impl Into<String>) -> Self {
        Error::BadInput(msg.into())
    }

    pub fn bad_query(msg: impl Into<String>) -> Self {
        Error::BadQuery(msg.into())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}
