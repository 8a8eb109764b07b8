//! Store errors.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Requested-types column or a payload failed to (de)serialize.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema migration {version} failed: {message}")]
    Migration { version: u32, message: String },

    /// No row with this key. `entity` names the table's domain object.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Rejected before touching the database.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A persisted row could not be decoded back into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// The blocking-pool task died or the connection mutex was poisoned.
    #[error("storage task failed: {0}")]
    TaskJoin(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
