/// Identity uniqueness guard
///
/// Checks username / email / phone against the store before a write so a
/// collision is reported as `DuplicateField` instead of a storage error.
/// Blank or absent values are exempt. The store's own constraint remains
/// the final word when two writers race past the guard.

use tracing::debug;

use crate::error::{UserError, UserResult};
use crate::models::user::{UniqueField, User, UserId};
use crate::store::RecordStore;

/// Pre-write uniqueness checks against a [`RecordStore`]
pub struct UniquenessGuard<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> UniquenessGuard<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Fails with `DuplicateField` if a record other than `exclude` holds `value`
    pub async fn check_available(
        &self,
        field: UniqueField,
        value: Option<&str>,
        exclude: Option<UserId>,
    ) -> UserResult<()> {
        let Some(value) = value.filter(|v| !v.trim().is_empty()) else {
            return Ok(());
        };

        match self.store.find_by_unique_field(field, value).await? {
            Some(holder) if Some(holder.id) != exclude => {
                debug!(%field, holder_id = holder.id, "Unique value already taken");
                Err(UserError::DuplicateField { field })
            }
            _ => Ok(()),
        }
    }

    /// Checks the given fields of `candidate`, reporting the first conflict
    pub async fn check_fields(
        &self,
        candidate: &User,
        fields: &[UniqueField],
        exclude: Option<UserId>,
    ) -> UserResult<()> {
        for field in fields {
            self.check_available(*field, field.value_of(candidate), exclude)
                .await?;
        }
        Ok(())
    }
}
