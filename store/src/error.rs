//! Error types for the lattice store.

use crate::DataId;
use thiserror::Error;

/// All possible errors from the store core.
///
/// Missing data is never an error: the reader reports it through
/// [`Snapshot::is_missing_data`](crate::Snapshot). Everything here is either
/// a payload that conflicts with its selection shape, a violated caller
/// contract, or a failure reported by the network boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Payload shape errors
    #[error("shape mismatch at '{field}': {reason}")]
    Shape { field: String, reason: String },

    // Contract violations
    #[error("unknown fragment: {0}")]
    UnknownFragment(String),

    #[error("unbound variable: ${0}")]
    UnboundVariable(String),

    #[error("missing __typename on record '{0}'")]
    MissingTypename(DataId),

    #[error("record already exists: {0}")]
    RecordAlreadyExists(DataId),

    #[error("no handler registered for handle '{0}'")]
    HandlerNotFound(String),

    #[error("field '{field}' on record '{id}' is not {expected}")]
    UnexpectedFieldType {
        id: DataId,
        field: String,
        expected: &'static str,
    },

    // Network errors
    #[error("network error: {0}")]
    Network(String),

    // Persistence errors
    #[error("invalid source: {0}")]
    InvalidSource(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
