/// Entity management API for user records
///
/// [`UserService`] composes the Record Store, the uniqueness guard, the
/// credential hasher and the partial-update engine into the operations the
/// request layer calls.
///
/// # Concurrency
///
/// The service is stateless between calls and holds no locks. Every
/// read-modify-write goes through the store's conditional update: the
/// change-set is applied to a fresh read and written only if the record's
/// version has not moved. A lost race re-reads and re-applies, up to
/// [`MAX_WRITE_ATTEMPTS`] times, then fails with `Contended`.
///
/// | Operation          | Shape                                   |
/// |--------------------|-----------------------------------------|
/// | `toggle_disabled`  | flip: negates the value it just read    |
/// | `set_disabled`     | set-to: result independent of the read  |
/// | `toggle_anonymous` | flip                                    |
/// | `set_anonymous`    | set-to                                  |
///
/// Flips are not safe to retry blindly from outside: two successful flips
/// cancel out. Set-to calls are idempotent.
///
/// # Cancellation
///
/// Each operation takes a [`CancellationToken`]. Every store call is raced
/// against it; once it fires the operation stops with `Cancelled` before
/// issuing further writes.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
/// use usrd_shared::models::user::CreateUser;
/// use usrd_shared::store::MemoryStore;
/// use usrd_shared::users::UserService;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let service = UserService::new(Arc::new(MemoryStore::new()));
/// let cancel = CancellationToken::new();
///
/// let ada = service
///     .create(
///         CreateUser {
///             name: "Ada".to_string(),
///             email: Some("ada@x.io".to_string()),
///             ..Default::default()
///         },
///         &cancel,
///     )
///     .await?;
///
/// let ada = service.toggle_disabled(ada.id, &cancel).await?;
/// assert!(ada.disabled);
/// # Ok(())
/// # }
/// ```

use chrono::{SubsecRound, Utc};
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::auth::password::{hash_password, verify_password};
use crate::error::{UserError, UserResult};
use crate::models::user::{
    CreateUser, UniqueField, UpdateUser, User, UserId, UserList, DEFAULT_LOCALE, DEFAULT_ROLE,
    MAX_ACTIVE_MFA_TYPE_LEN, MAX_AVATAR_URL_LEN, MAX_EMAIL_LEN, MAX_LOCALE_LEN, MAX_NAME_LEN,
    MAX_PHONE_LEN, MAX_TOTP_SECRET_LEN, MAX_USERNAME_LEN,
};
use crate::store::{Conflict, RecordStore, StoreError};

pub mod ids;
pub mod patch;
pub mod uniqueness;

use ids::{IdAllocator, RandomIdAllocator, MAX_ID_ATTEMPTS};
use patch::{optional_text, required_text, Change, ChangeSet};
use uniqueness::UniquenessGuard;

/// Conditional-write attempts before giving up with `Contended`
pub const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Longest plaintext secret accepted for hashing
pub const MAX_PASSWORD_LEN: usize = 1024;

/// Façade over the user record lifecycle
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn RecordStore>,
    ids: Arc<dyn IdAllocator>,
}

/// Runs `fut` unless `cancel` fires first
async fn cancellable<F: Future>(cancel: &CancellationToken, fut: F) -> UserResult<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UserError::Cancelled),
        output = fut => Ok(output),
    }
}

/// Hashes a plaintext secret on the blocking pool
async fn hash_secret(plaintext: String) -> UserResult<String> {
    if plaintext.is_empty() {
        return Err(UserError::invalid("password", "must not be empty"));
    }
    if plaintext.len() > MAX_PASSWORD_LEN {
        return Err(UserError::invalid(
            "password",
            format!("must be at most {} bytes", MAX_PASSWORD_LEN),
        ));
    }

    let hash = tokio::task::spawn_blocking(move || hash_password(&plaintext))
        .await
        .map_err(|e| UserError::HashingFailure(format!("hashing task failed: {}", e)))??;
    Ok(hash)
}

impl UserService {
    /// Creates a service with random id allocation
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self::with_id_allocator(store, Arc::new(RandomIdAllocator))
    }

    /// Creates a service with a custom id source
    pub fn with_id_allocator(store: Arc<dyn RecordStore>, ids: Arc<dyn IdAllocator>) -> Self {
        Self { store, ids }
    }

    /// The underlying store
    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    /// Creates a user
    ///
    /// Applies defaults, hashes the secret if one is given, checks unique
    /// fields, then inserts under a freshly drawn id. An id collision
    /// draws again, up to [`MAX_ID_ATTEMPTS`] times.
    ///
    /// # Errors
    ///
    /// `InvalidInput`, `DuplicateField`, `HashingFailure`,
    /// `IdAllocationExhausted`, `StorageFailure`, `Cancelled`.
    #[instrument(skip_all)]
    pub async fn create(&self, input: CreateUser, cancel: &CancellationToken) -> UserResult<User> {
        let name = required_text("name", &input.name, MAX_NAME_LEN)?;
        let locale = match optional_text("locale", input.locale, MAX_LOCALE_LEN)? {
            Some(locale) => required_text("locale", &locale, MAX_LOCALE_LEN)?,
            None => DEFAULT_LOCALE.to_string(),
        };
        let username = optional_text("username", input.username, MAX_USERNAME_LEN)?;
        let email = optional_text("email", input.email, MAX_EMAIL_LEN)?;
        let phone = optional_text("phone", input.phone, MAX_PHONE_LEN)?;
        let avatar_url = optional_text("avatar_url", input.avatar_url, MAX_AVATAR_URL_LEN)?;
        let totp_secret = optional_text("totp_secret", input.totp_secret, MAX_TOTP_SECRET_LEN)?;
        let active_mfa_type =
            optional_text("active_mfa_type", input.active_mfa_type, MAX_ACTIVE_MFA_TYPE_LEN)?;

        let password_hash = match input.password {
            Some(plaintext) => Some(hash_secret(plaintext).await?),
            None => None,
        };

        // Stored timestamps keep microseconds; match them so reads agree
        let now = Utc::now().trunc_subsecs(6);
        let mut record = User {
            id: 0,
            name,
            username,
            email,
            phone,
            disabled: false,
            avatar_url,
            locale,
            password_hash,
            default_role: DEFAULT_ROLE.to_string(),
            is_anonymous: false,
            totp_secret,
            active_mfa_type,
            metadata: input.metadata,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let guard = UniquenessGuard::new(self.store.as_ref());
        cancellable(cancel, guard.check_fields(&record, &UniqueField::ALL, None)).await??;

        for attempt in 1..=MAX_ID_ATTEMPTS {
            record.id = self.ids.next_id();

            match cancellable(cancel, self.store.insert_if_absent(&record)).await? {
                Ok(()) => {
                    info!(user_id = record.id, "User created");
                    return Ok(record);
                }
                Err(StoreError::Conflict(Conflict::Id)) => {
                    warn!(attempt, user_id = record.id, "User id collision, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(UserError::IdAllocationExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    /// Fetches one user
    #[instrument(skip(self, cancel))]
    pub async fn get(&self, id: UserId, cancel: &CancellationToken) -> UserResult<User> {
        cancellable(cancel, self.store.get_by_id(id))
            .await??
            .ok_or(UserError::NotFound { id })
    }

    /// Fetches every user with a count summary
    #[instrument(skip_all)]
    pub async fn list(&self, cancel: &CancellationToken) -> UserResult<UserList> {
        let users = cancellable(cancel, self.store.list_all()).await??;
        let message = format!("{} users fetched", users.len());
        debug!(count = users.len(), "Users listed");

        Ok(UserList { users, message })
    }

    /// Applies a sparse change-set to the generic fields
    ///
    /// An empty change-set is not a mutation: the stored record is
    /// returned as is and `updated_at` does not move.
    #[instrument(skip(self, update, cancel))]
    pub async fn update(
        &self,
        id: UserId,
        update: UpdateUser,
        cancel: &CancellationToken,
    ) -> UserResult<User> {
        let changes = ChangeSet::from(update);
        if changes.is_empty() {
            return self.get(id, cancel).await;
        }

        self.modify(id, cancel, |_| Ok(changes.clone())).await
    }

    /// Replaces the metadata document wholesale; `None` clears it
    #[instrument(skip(self, metadata, cancel))]
    pub async fn update_metadata(
        &self,
        id: UserId,
        metadata: Option<JsonValue>,
        cancel: &CancellationToken,
    ) -> UserResult<User> {
        let changes = ChangeSet {
            metadata: Change::Set(metadata),
            ..Default::default()
        };

        self.modify(id, cancel, |_| Ok(changes.clone())).await
    }

    /// Flips `disabled`
    #[instrument(skip(self, cancel))]
    pub async fn toggle_disabled(&self, id: UserId, cancel: &CancellationToken) -> UserResult<User> {
        self.modify(id, cancel, |current| {
            Ok(ChangeSet {
                disabled: Change::Set(!current.disabled),
                ..Default::default()
            })
        })
        .await
    }

    /// Sets `disabled` to `value`
    #[instrument(skip(self, cancel))]
    pub async fn set_disabled(
        &self,
        id: UserId,
        value: bool,
        cancel: &CancellationToken,
    ) -> UserResult<User> {
        let changes = ChangeSet {
            disabled: Change::Set(value),
            ..Default::default()
        };

        self.modify(id, cancel, |_| Ok(changes.clone())).await
    }

    /// Flips `is_anonymous`
    #[instrument(skip(self, cancel))]
    pub async fn toggle_anonymous(
        &self,
        id: UserId,
        cancel: &CancellationToken,
    ) -> UserResult<User> {
        self.modify(id, cancel, |current| {
            Ok(ChangeSet {
                is_anonymous: Change::Set(!current.is_anonymous),
                ..Default::default()
            })
        })
        .await
    }

    /// Sets `is_anonymous` to `value`
    #[instrument(skip(self, cancel))]
    pub async fn set_anonymous(
        &self,
        id: UserId,
        value: bool,
        cancel: &CancellationToken,
    ) -> UserResult<User> {
        let changes = ChangeSet {
            is_anonymous: Change::Set(value),
            ..Default::default()
        };

        self.modify(id, cancel, |_| Ok(changes.clone())).await
    }

    /// Replaces the stored secret
    ///
    /// The plaintext is hashed exactly once, before the write loop; retries
    /// reuse the same hash.
    #[instrument(skip(self, password, cancel))]
    pub async fn set_password(
        &self,
        id: UserId,
        password: String,
        cancel: &CancellationToken,
    ) -> UserResult<User> {
        // Fail fast on a missing record before paying for the hash
        self.get(id, cancel).await?;

        let hash = hash_secret(password).await?;
        let changes = ChangeSet {
            password_hash: Change::Set(Some(hash)),
            ..Default::default()
        };

        self.modify(id, cancel, |_| Ok(changes.clone())).await
    }

    /// Checks a plaintext secret against the stored hash
    ///
    /// A user without a stored secret never verifies.
    #[instrument(skip(self, password, cancel))]
    pub async fn verify_password(
        &self,
        id: UserId,
        password: String,
        cancel: &CancellationToken,
    ) -> UserResult<bool> {
        let user = self.get(id, cancel).await?;
        let Some(hash) = user.password_hash else {
            return Ok(false);
        };

        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| UserError::HashingFailure(format!("verification task failed: {}", e)))??;
        Ok(valid)
    }

    /// Permanently removes a user
    ///
    /// # Errors
    ///
    /// `NotFound` when no row was affected, including a repeated delete.
    #[instrument(skip(self, cancel))]
    pub async fn delete(&self, id: UserId, cancel: &CancellationToken) -> UserResult<()> {
        let removed = cancellable(cancel, self.store.delete_by_id(id)).await??;
        if removed == 0 {
            return Err(UserError::NotFound { id });
        }

        info!(user_id = id, "User deleted");
        Ok(())
    }

    /// Removes every user, returning how many were deleted
    #[instrument(skip_all)]
    pub async fn delete_all(&self, cancel: &CancellationToken) -> UserResult<u64> {
        let removed = cancellable(cancel, self.store.delete_all()).await??;
        warn!(count = removed, "All users deleted");
        Ok(removed)
    }

    /// Read, build a change-set from the read, apply, conditionally write
    async fn modify<F>(&self, id: UserId, cancel: &CancellationToken, build: F) -> UserResult<User>
    where
        F: Fn(&User) -> UserResult<ChangeSet>,
    {
        let guard = UniquenessGuard::new(self.store.as_ref());

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = cancellable(cancel, self.store.get_by_id(id))
                .await??
                .ok_or(UserError::NotFound { id })?;

            let changes = build(&current)?;
            let next = changes.apply(&current, Utc::now())?;

            let fields = changes.unique_fields();
            cancellable(cancel, guard.check_fields(&next, &fields, Some(id))).await??;

            match cancellable(cancel, self.store.update_conditional(&next, current.version)).await? {
                Ok(stored) => {
                    debug!(user_id = id, version = stored.version, "User updated");
                    return Ok(stored);
                }
                Err(StoreError::Conflict(Conflict::Stale)) => {
                    debug!(attempt, user_id = id, "User changed concurrently, re-reading");
                }
                Err(StoreError::NotFound) => return Err(UserError::NotFound { id }),
                Err(e) => return Err(e.into()),
            }
        }

        warn!(user_id = id, "Giving up after repeated write conflicts");
        Err(UserError::Contended { id })
    }
}
