/// Record Store Adapter
///
/// The persistence boundary for user records. The entity management API
/// only talks to storage through [`RecordStore`], so the backing engine is
/// an injected dependency rather than process-global state.
///
/// # Contract
///
/// - `insert_if_absent` rejects (never overwrites) an existing id with
///   [`Conflict::Id`], and a taken username/email/phone with
///   [`Conflict::Field`].
/// - `update_conditional` writes only if the stored `version` still equals
///   the version the caller read; otherwise [`Conflict::Stale`]. On success
///   the stored version is bumped by one and the persisted record returned.
/// - `delete_by_id` / `delete_all` report the number of affected rows.
///
/// # Implementations
///
/// - [`memory::MemoryStore`]: in-process map, for tests and local runs
/// - [`postgres::PgUserStore`]: PostgreSQL via sqlx

use async_trait::async_trait;
use std::fmt;

use crate::models::user::{UniqueField, User, UserId};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgUserStore;

/// Kind of write conflict detected by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conflict {
    /// A record with this id already exists
    Id,

    /// Another record already holds this unique value
    Field(UniqueField),

    /// The record changed since it was read
    Stale,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conflict::Id => write!(f, "id already exists"),
            Conflict::Field(field) => write!(f, "{} already taken", field),
            Conflict::Stale => write!(f, "record changed since it was read"),
        }
    }
}

/// Errors returned by a [`RecordStore`]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Write rejected by a uniqueness or version check
    #[error("Write conflict: {0}")]
    Conflict(Conflict),

    /// Conditional update targeted a missing record
    #[error("Record not found")]
    NotFound,

    /// Database driver error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Any other backend failure
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Store result type alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations for user records
///
/// Every call may suspend on I/O. Callers race calls against their own
/// cancellation signal; implementations must not leave a partial write
/// visible when a call is dropped mid-flight.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record, rejecting id or unique-field collisions
    async fn insert_if_absent(&self, record: &User) -> StoreResult<()>;

    /// Fetches a record by id
    async fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Fetches every record
    async fn list_all(&self) -> StoreResult<Vec<User>>;

    /// Replaces a record if its stored version equals `expected_version`
    async fn update_conditional(&self, record: &User, expected_version: i64)
        -> StoreResult<User>;

    /// Deletes a record, returning the number of rows removed
    async fn delete_by_id(&self, id: UserId) -> StoreResult<u64>;

    /// Deletes every record, returning the number of rows removed
    async fn delete_all(&self) -> StoreResult<u64>;

    /// Finds the record holding `value` in a unique field
    async fn find_by_unique_field(
        &self,
        field: UniqueField,
        value: &str,
    ) -> StoreResult<Option<User>>;

    /// Checks that the backend is reachable
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
