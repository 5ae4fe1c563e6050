/// Error types for user entity management
///
/// Every failure here is per-call: none of them leaves the service unusable
/// for other ids or operations.

use crate::auth::password::PasswordError;
use crate::models::user::{UniqueField, UserId};
use crate::store::{Conflict, StoreError};

/// Result alias used by the entity management API
pub type UserResult<T> = Result<T, UserError>;

/// Errors surfaced by [`crate::users::UserService`]
#[derive(Debug, thiserror::Error)]
pub enum UserError {
    /// No record with this id
    #[error("User {id} not found")]
    NotFound { id: UserId },

    /// Another record already holds this unique value
    #[error("Duplicate value for field '{field}'")]
    DuplicateField { field: UniqueField },

    /// The secret could not be hashed (or a stored hash could not be read)
    #[error("Password hashing failed: {0}")]
    HashingFailure(String),

    /// Every id drawn for a new record collided with an existing one
    #[error("Could not allocate a free user id after {attempts} attempts")]
    IdAllocationExhausted { attempts: u32 },

    /// The Record Store failed
    #[error("Storage failure: {0}")]
    StorageFailure(StoreError),

    /// Caller input was rejected before any write
    #[error("Invalid value for '{field}': {reason}")]
    InvalidInput { field: &'static str, reason: String },

    /// The caller's cancellation signal fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Conditional writes kept losing to concurrent writers
    #[error("User {id} is being modified concurrently")]
    Contended { id: UserId },
}

impl UserError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        UserError::InvalidInput {
            field,
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for UserError {
    fn from(err: StoreError) -> Self {
        match err {
            // Adapter-level uniqueness rejection (a race the guard missed)
            StoreError::Conflict(Conflict::Field(field)) => UserError::DuplicateField { field },
            other => UserError::StorageFailure(other),
        }
    }
}

impl From<PasswordError> for UserError {
    fn from(err: PasswordError) -> Self {
        UserError::HashingFailure(err.to_string())
    }
}
