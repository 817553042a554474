use crate::{auth::AuthError, state::StoreError};
use tapgame_types::PlayerInvariantError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("unauthorized: {0}")]
    Auth(#[from] AuthError),
    #[error("credential does not match requested player")]
    IdentityMismatch,
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("player not found: {0}")]
    NotFound(String),
    #[error("storage temporarily unavailable: {0}")]
    StorageTransient(String),
    #[error("storage failure: {0}")]
    StorageFatal(String),
    #[error("rejected invalid snapshot: {0}")]
    Invariant(#[from] PlayerInvariantError),
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(reason) => Error::StorageTransient(reason),
            StoreError::Fatal(reason) => Error::StorageFatal(reason),
        }
    }
}

impl Error {
    /// Short machine-readable code placed in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Auth(_) => "unauthorized",
            Error::IdentityMismatch => "forbidden",
            Error::InvalidRequest(code) => code,
            Error::NotFound(_) => "not_found",
            Error::StorageTransient(_) => "unavailable",
            Error::StorageFatal(_) | Error::Invariant(_) => "internal_error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Error::StorageTransient(_))
    }
}
