use thiserror::Error;

/// Error taxonomy shared by the service layer. Handlers catch these at the
/// boundary and map them onto HTTP statuses; nothing crosses a handler.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Storage(#[from] surrealdb::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DbError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        DbError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        DbError::Conflict(msg.into())
    }
}

pub type DbResult<T> = Result<T, DbError>;
