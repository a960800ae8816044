use thiserror::Error;

/// Failures raised by a [`crate::store::SlotStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached when opening it.
    #[error("failed to connect to store: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("slot not found: {id}")]
    NotFound { id: String },

    /// A stored row could not be turned into a `Slot`.
    #[error("corrupt slot {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// Store-specific failure that does not come from SQL (e.g. injected by tests).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound { id: "unknown".to_string() },
            other => StoreError::Database(other),
        }
    }
}

/// Errors that abort a cleanup run before any summary can be produced.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to load slots: {0}")]
    Load(#[source] StoreError),

    #[error("deadline exceeded while loading slots")]
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not a valid number: {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("failed to load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),
}
