use thiserror::Error;

/// All store-layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row with the given identity (or the row failed a write precondition).
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Caller-supplied input was rejected (bad due date, empty title, ...).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The capsule is no longer pending and cannot be changed.
    #[error("Capsule {id} is {status}; only pending capsules can be changed")]
    InvalidState { id: i64, status: String },

    /// A stored row violates a data invariant.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The blocking task running the query panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Classify an error raised while decoding a row: a value that cannot be
    /// converted is corruption, anything else is a database failure.
    pub(crate) fn from_row(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(idx, _, source) => {
                StoreError::Corrupt(format!("column {idx}: {source}"))
            }
            other => StoreError::Database(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
