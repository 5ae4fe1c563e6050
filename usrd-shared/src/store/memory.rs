/// In-memory Record Store
///
/// Keeps records in a `BTreeMap` behind a `tokio::sync::RwLock`. All checks
/// for a write happen under the write lock, so uniqueness and version
/// checks are atomic with the write itself.
///
/// Records do not survive the process. Used by the test suites and by
/// `STORE_BACKEND=memory`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{Conflict, RecordStore, StoreError, StoreResult};
use crate::models::user::{UniqueField, User, UserId};

/// Map-backed [`RecordStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<UserId, User>>,
}

impl MemoryStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

/// First unique field of `candidate` already held by a record other than itself
fn taken_field(records: &BTreeMap<UserId, User>, candidate: &User) -> Option<UniqueField> {
    UniqueField::ALL.into_iter().find(|field| {
        field.value_of(candidate).is_some_and(|value| {
            records
                .values()
                .any(|other| other.id != candidate.id && field.value_of(other) == Some(value))
        })
    })
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_if_absent(&self, record: &User) -> StoreResult<()> {
        let mut records = self.records.write().await;

        if records.contains_key(&record.id) {
            return Err(StoreError::Conflict(Conflict::Id));
        }
        if let Some(field) = taken_field(&records, record) {
            return Err(StoreError::Conflict(Conflict::Field(field)));
        }

        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_all(&self) -> StoreResult<Vec<User>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn update_conditional(
        &self,
        record: &User,
        expected_version: i64,
    ) -> StoreResult<User> {
        let mut records = self.records.write().await;

        let stored_version = records
            .get(&record.id)
            .map(|stored| stored.version)
            .ok_or(StoreError::NotFound)?;
        if stored_version != expected_version {
            return Err(StoreError::Conflict(Conflict::Stale));
        }
        if let Some(field) = taken_field(&records, record) {
            return Err(StoreError::Conflict(Conflict::Field(field)));
        }

        let mut next = record.clone();
        next.version = expected_version + 1;
        records.insert(next.id, next.clone());
        Ok(next)
    }

    async fn delete_by_id(&self, id: UserId) -> StoreResult<u64> {
        Ok(self.records.write().await.remove(&id).map_or(0, |_| 1))
    }

    async fn delete_all(&self) -> StoreResult<u64> {
        let mut records = self.records.write().await;
        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }

    async fn find_by_unique_field(
        &self,
        field: UniqueField,
        value: &str,
    ) -> StoreResult<Option<User>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|user| field.value_of(user) == Some(value))
            .cloned())
    }
}
