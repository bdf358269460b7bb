use sled::transaction::{ConflictableTransactionError, TransactionError};

pub type Result<T> = std::result::Result<T, ConsentError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsentError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Coarse classification used by callers to map failures onto their own
/// transport codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidTransition,
    Conflict,
    Validation,
    Storage,
}

impl ConsentError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<sled::Error> for ConsentError {
    fn from(value: sled::Error) -> Self {
        Self::Storage(value.to_string())
    }
}

impl From<minicbor::decode::Error> for ConsentError {
    fn from(value: minicbor::decode::Error) -> Self {
        Self::Storage(format!("corrupt record: {value}"))
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for ConsentError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        Self::Storage(format!("failed to encode record: {value}"))
    }
}

impl From<TransactionError<ConsentError>> for ConsentError {
    fn from(value: TransactionError<ConsentError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => err.into(),
        }
    }
}

// Lets `?` abort a sled transaction with one of our own errors.
impl From<ConsentError> for ConflictableTransactionError<ConsentError> {
    fn from(value: ConsentError) -> Self {
        ConflictableTransactionError::Abort(value)
    }
}
