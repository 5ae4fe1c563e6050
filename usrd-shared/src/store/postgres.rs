/// PostgreSQL Record Store
///
/// Uniqueness is enforced by the `users` table constraints; violations
/// (SQLSTATE 23505) are translated back into [`Conflict`] values by
/// constraint name. Conditional updates compare the `version` column in
/// the `WHERE` clause, so a read-modify-write is a single atomic statement.
///
/// # Example
///
/// ```no_run
/// use usrd_shared::db::pool::{create_pool, DatabaseConfig};
/// use usrd_shared::store::{PgUserStore, RecordStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let pool = create_pool(DatabaseConfig::from_url("postgresql://localhost/usrd")).await?;
/// let store = PgUserStore::new(pool);
/// let users = store.list_all().await?;
/// println!("{} users", users.len());
/// # Ok(())
/// # }
/// ```

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::{Conflict, RecordStore, StoreError, StoreResult};
use crate::db::pool::health_check;
use crate::models::user::{UniqueField, User, UserId};

const UNIQUE_VIOLATION: &str = "23505";

/// sqlx-backed [`RecordStore`]
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    /// Wraps an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Maps a write error to a conflict when it is a unique violation
fn map_write_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let conflict = match db_err.constraint() {
                Some("users_username_key") => Some(Conflict::Field(UniqueField::Username)),
                Some("users_email_key") => Some(Conflict::Field(UniqueField::Email)),
                Some("users_phone_key") => Some(Conflict::Field(UniqueField::Phone)),
                Some("users_pkey") => Some(Conflict::Id),
                _ => None,
            };
            if let Some(conflict) = conflict {
                debug!(%conflict, "Unique constraint rejected write");
                return StoreError::Conflict(conflict);
            }
        }
    }
    StoreError::Database(err)
}

fn lookup_query(field: UniqueField) -> &'static str {
    match field {
        UniqueField::Username => {
            r#"
            SELECT id, name, username, email, phone, disabled, avatar_url, locale,
                   password_hash, default_role, is_anonymous, totp_secret,
                   active_mfa_type, metadata, version, created_at, updated_at
            FROM users
            WHERE username = $1
            "#
        }
        UniqueField::Email => {
            r#"
            SELECT id, name, username, email, phone, disabled, avatar_url, locale,
                   password_hash, default_role, is_anonymous, totp_secret,
                   active_mfa_type, metadata, version, created_at, updated_at
            FROM users
            WHERE email = $1
            "#
        }
        UniqueField::Phone => {
            r#"
            SELECT id, name, username, email, phone, disabled, avatar_url, locale,
                   password_hash, default_role, is_anonymous, totp_secret,
                   active_mfa_type, metadata, version, created_at, updated_at
            FROM users
            WHERE phone = $1
            "#
        }
    }
}

#[async_trait]
impl RecordStore for PgUserStore {
    async fn insert_if_absent(&self, record: &User) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, username, email, phone, disabled, avatar_url,
                               locale, password_hash, default_role, is_anonymous,
                               totp_secret, active_mfa_type, metadata, version,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(&record.username)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(record.disabled)
        .bind(&record.avatar_url)
        .bind(&record.locale)
        .bind(&record.password_hash)
        .bind(&record.default_role)
        .bind(record.is_anonymous)
        .bind(&record.totp_secret)
        .bind(&record.active_mfa_type)
        .bind(&record.metadata)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        Ok(())
    }

    async fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, username, email, phone, disabled, avatar_url, locale,
                   password_hash, default_role, is_anonymous, totp_secret,
                   active_mfa_type, metadata, version, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list_all(&self) -> StoreResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT id, name, username, email, phone, disabled, avatar_url, locale,
                   password_hash, default_role, is_anonymous, totp_secret,
                   active_mfa_type, metadata, version, created_at, updated_at
            FROM users
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn update_conditional(
        &self,
        record: &User,
        expected_version: i64,
    ) -> StoreResult<User> {
        // id and created_at are never written here
        let updated = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = $3, username = $4, email = $5, phone = $6, disabled = $7,
                avatar_url = $8, locale = $9, password_hash = $10, default_role = $11,
                is_anonymous = $12, totp_secret = $13, active_mfa_type = $14,
                metadata = $15, updated_at = $16, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING id, name, username, email, phone, disabled, avatar_url, locale,
                      password_hash, default_role, is_anonymous, totp_secret,
                      active_mfa_type, metadata, version, created_at, updated_at
            "#,
        )
        .bind(record.id)
        .bind(expected_version)
        .bind(&record.name)
        .bind(&record.username)
        .bind(&record.email)
        .bind(&record.phone)
        .bind(record.disabled)
        .bind(&record.avatar_url)
        .bind(&record.locale)
        .bind(&record.password_hash)
        .bind(&record.default_role)
        .bind(record.is_anonymous)
        .bind(&record.totp_secret)
        .bind(&record.active_mfa_type)
        .bind(&record.metadata)
        .bind(record.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_write_error)?;

        if let Some(user) = updated {
            return Ok(user);
        }

        // Zero rows: either the record is gone or its version moved on
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(record.id)
            .fetch_one(&self.pool)
            .await?;

        if exists {
            Err(StoreError::Conflict(Conflict::Stale))
        } else {
            Err(StoreError::NotFound)
        }
    }

    async fn delete_by_id(&self, id: UserId) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM users")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn find_by_unique_field(
        &self,
        field: UniqueField,
        value: &str,
    ) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(lookup_query(field))
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    async fn ping(&self) -> StoreResult<()> {
        health_check(&self.pool).await?;
        Ok(())
    }
}
