//! Service error types.
//!
//! [`VerifierError`] is what callers of the coordinator and the query
//! façade see. Store and bus failures are folded into it so callers can
//! tell a bad request from a missing record from an infrastructure fault.

use std::time::Duration;

use verigate_kernel::BusError;
use verigate_store::StoreError;

/// Errors surfaced by the verification services.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    /// The request was malformed; nothing was persisted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The referenced verification or cache entry does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The message bus rejected a publish or subscribe.
    #[error("transport error: {0}")]
    Transport(#[from] BusError),

    /// The database failed. Not retried here.
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),

    /// A store or bus call exceeded the operation deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A verification was persisted but its creation request could not be
    /// emitted, and rolling the record back failed too.
    #[error("verification {verification_id} persisted without an outbound request: {reason}")]
    Inconsistent {
        verification_id: String,
        reason: String,
    },
}

impl VerifierError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

impl From<StoreError> for VerifierError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::InvalidArgument(message) => Self::InvalidArgument(message),
            other => Self::Storage(other),
        }
    }
}

/// Convenience alias used throughout the service crate.
pub type VerifierResult<T> = std::result::Result<T, VerifierError>;
