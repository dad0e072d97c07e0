//! Error types for flow table operations.

use ofstate_types::{FlowId, Minimatch};
use thiserror::Error;

/// Error type for flow table operations.
///
/// Every failing mutation leaves the table exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FtError {
    /// An entry with the same flow id or the same strict-match key exists.
    /// Carries the id of the existing entry.
    #[error("Flow already exists: {0}")]
    AlreadyExists(FlowId),

    #[error("Flow not found")]
    NotFound,

    #[error("Invalid table id: {0}")]
    InvalidTableId(u8),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// An internal invariant audit failed.
    #[error("Flow table inconsistent: {0}")]
    Inconsistent(String),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

/// Result type for flow table operations.
pub type Result<T> = std::result::Result<T, FtError>;

/// A rejected add. The match criteria are handed back to the caller, who
/// still owns them.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct AddError {
    pub error: FtError,
    pub minimatch: Minimatch,
}

impl AddError {
    pub(crate) fn new(error: FtError, minimatch: Minimatch) -> Self {
        Self { error, minimatch }
    }

    pub fn kind(&self) -> &FtError {
        &self.error
    }

    pub fn into_minimatch(self) -> Minimatch {
        self.minimatch
    }
}

impl From<AddError> for FtError {
    fn from(err: AddError) -> Self {
        err.error
    }
}
