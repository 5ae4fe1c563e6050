/// Integration tests for the entity management API
///
/// Run against the in-memory Record Store, so no database is needed.

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use usrd_shared::error::UserError;
use usrd_shared::models::user::{
    CreateUser, UniqueField, UpdateUser, User, UserId, UserResponse, DEFAULT_LOCALE, DEFAULT_ROLE,
    MAX_ACTIVE_MFA_TYPE_LEN, MAX_LOCALE_LEN, MAX_PHONE_LEN,
};
use usrd_shared::store::{Conflict, MemoryStore, RecordStore, StoreError, StoreResult};
use usrd_shared::users::ids::{IdAllocator, MAX_ID_ATTEMPTS};
use usrd_shared::users::patch::Change;
use usrd_shared::users::UserService;

fn service() -> (UserService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (UserService::new(store.clone()), store)
}

fn named(name: &str) -> CreateUser {
    CreateUser {
        name: name.to_string(),
        ..Default::default()
    }
}

fn with_email(name: &str, email: &str) -> CreateUser {
    CreateUser {
        name: name.to_string(),
        email: Some(email.to_string()),
        ..Default::default()
    }
}

/// Hands out a fixed sequence of ids, repeating the last one
struct SequenceIds(Mutex<VecDeque<UserId>>);

impl SequenceIds {
    fn new(ids: &[UserId]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(ids.iter().copied().collect())))
    }
}

impl IdAllocator for SequenceIds {
    fn next_id(&self) -> UserId {
        let mut ids = self.0.lock().unwrap();
        if ids.len() > 1 {
            ids.pop_front().unwrap()
        } else {
            *ids.front().unwrap()
        }
    }
}

/// Lets a "concurrent writer" slip in before the first conditional update
struct InterferingStore {
    inner: MemoryStore,
    interfered: AtomicBool,
    always_stale: bool,
}

impl InterferingStore {
    fn new(always_stale: bool) -> Self {
        Self {
            inner: MemoryStore::new(),
            interfered: AtomicBool::new(false),
            always_stale,
        }
    }
}

#[async_trait]
impl RecordStore for InterferingStore {
    async fn insert_if_absent(&self, record: &User) -> StoreResult<()> {
        self.inner.insert_if_absent(record).await
    }

    async fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.get_by_id(id).await
    }

    async fn list_all(&self) -> StoreResult<Vec<User>> {
        self.inner.list_all().await
    }

    async fn update_conditional(&self, record: &User, expected_version: i64) -> StoreResult<User> {
        if self.always_stale {
            return Err(StoreError::Conflict(Conflict::Stale));
        }
        if !self.interfered.swap(true, Ordering::SeqCst) {
            let mut theirs = self.inner.get_by_id(record.id).await?.unwrap();
            theirs.disabled = true;
            let version = theirs.version;
            self.inner.update_conditional(&theirs, version).await?;
        }
        self.inner.update_conditional(record, expected_version).await
    }

    async fn delete_by_id(&self, id: UserId) -> StoreResult<u64> {
        self.inner.delete_by_id(id).await
    }

    async fn delete_all(&self) -> StoreResult<u64> {
        self.inner.delete_all().await
    }

    async fn find_by_unique_field(
        &self,
        field: UniqueField,
        value: &str,
    ) -> StoreResult<Option<User>> {
        self.inner.find_by_unique_field(field, value).await
    }
}

#[tokio::test]
async fn test_scenario_create_conflict_update_delete() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service.create(with_email("Ada", "ada@x.io"), &cancel).await.unwrap();
    assert!(ada.id > 0);
    assert!(!ada.disabled);
    assert_eq!(ada.locale, DEFAULT_LOCALE);
    assert_eq!(ada.default_role, DEFAULT_ROLE);
    let body = serde_json::to_value(UserResponse::from(&ada)).unwrap();
    assert!(body.get("password_hash").is_none());

    let err = service
        .create(with_email("Bob", "ada@x.io"), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UserError::DuplicateField {
            field: UniqueField::Email
        }
    ));

    let update = UpdateUser {
        locale: Change::Set("fr".to_string()),
        ..Default::default()
    };
    let updated = service.update(ada.id, update, &cancel).await.unwrap();
    assert_eq!(updated.locale, "fr");
    assert_eq!(updated.email.as_deref(), Some("ada@x.io"));

    for user in service.list(&cancel).await.unwrap().users {
        service.delete(user.id, &cancel).await.unwrap();
    }
    let listed = service.list(&cancel).await.unwrap();
    assert!(listed.users.is_empty());
    assert_eq!(listed.message, "0 users fetched");
}

#[tokio::test]
async fn test_list_reports_count() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    service.create(named("Ada"), &cancel).await.unwrap();
    service.create(named("Grace"), &cancel).await.unwrap();

    let listed = service.list(&cancel).await.unwrap();
    assert_eq!(listed.users.len(), 2);
    assert_eq!(listed.message, "2 users fetched");
}

#[tokio::test]
async fn test_records_without_unique_values_coexist() {
    let (service, store) = service();
    let cancel = CancellationToken::new();

    for name in ["a", "b", "c"] {
        let input = CreateUser {
            name: name.to_string(),
            username: Some(String::new()),
            ..Default::default()
        };
        let user = service.create(input, &cancel).await.unwrap();
        assert_eq!(user.username, None);
    }
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn test_update_to_taken_username_changes_nothing() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service
        .create(
            CreateUser {
                username: Some("ada".to_string()),
                ..named("Ada")
            },
            &cancel,
        )
        .await
        .unwrap();
    let bob = service
        .create(
            CreateUser {
                username: Some("bob".to_string()),
                ..named("Bob")
            },
            &cancel,
        )
        .await
        .unwrap();

    let steal = UpdateUser {
        username: Change::Set(Some("ada".to_string())),
        locale: Change::Set("fr".to_string()),
        ..Default::default()
    };
    let err = service.update(bob.id, steal, &cancel).await.unwrap_err();
    assert!(matches!(
        err,
        UserError::DuplicateField {
            field: UniqueField::Username
        }
    ));

    assert_eq!(service.get(ada.id, &cancel).await.unwrap(), ada);
    assert_eq!(service.get(bob.id, &cancel).await.unwrap(), bob);
}

#[tokio::test]
async fn test_update_to_own_username_is_allowed() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service
        .create(
            CreateUser {
                username: Some("ada".to_string()),
                ..named("Ada")
            },
            &cancel,
        )
        .await
        .unwrap();

    let same = UpdateUser {
        username: Change::Set(Some("ada".to_string())),
        ..Default::default()
    };
    let updated = service.update(ada.id, same, &cancel).await.unwrap();
    assert_eq!(updated.username.as_deref(), Some("ada"));
    assert!(updated.updated_at > ada.updated_at);
    assert_eq!(updated.created_at, ada.created_at);
}

#[tokio::test]
async fn test_partial_update_isolation() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let original = service
        .create(
            CreateUser {
                phone: Some("+15550100".to_string()),
                avatar_url: Some("https://img.example/ada.png".to_string()),
                metadata: Some(json!({ "team": "analytics" })),
                ..with_email("Ada", "ada@x.io")
            },
            &cancel,
        )
        .await
        .unwrap();
    let original = service.set_disabled(original.id, true, &cancel).await.unwrap();

    let update = UpdateUser {
        locale: Change::Set("fr".to_string()),
        ..Default::default()
    };
    let updated = service.update(original.id, update, &cancel).await.unwrap();

    assert_eq!(updated.locale, "fr");
    assert_eq!(updated.email, original.email);
    assert_eq!(updated.phone, original.phone);
    assert_eq!(updated.disabled, original.disabled);
    assert_eq!(updated.avatar_url, original.avatar_url);
    assert_eq!(updated.metadata, original.metadata);
    assert_eq!(updated.name, original.name);
}

#[tokio::test]
async fn test_explicit_clear_vs_omit() {
    let (service, _) = service();
    let cancel = CancellationToken::new();
    let input = CreateUser {
        avatar_url: Some("https://img.example/a.png".to_string()),
        ..named("A")
    };

    let a = service.create(input.clone(), &cancel).await.unwrap();
    let b = service.create(input, &cancel).await.unwrap();

    let clear = UpdateUser {
        avatar_url: Change::Set(Some(String::new())),
        ..Default::default()
    };
    let omit = UpdateUser {
        name: Change::Set("B".to_string()),
        ..Default::default()
    };

    let a = service.update(a.id, clear, &cancel).await.unwrap();
    let b = service.update(b.id, omit, &cancel).await.unwrap();

    assert_eq!(a.avatar_url, None);
    assert_eq!(b.avatar_url.as_deref(), Some("https://img.example/a.png"));
}

#[tokio::test]
async fn test_empty_update_is_not_a_mutation() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service.create(named("Ada"), &cancel).await.unwrap();
    let same = service
        .update(ada.id, UpdateUser::default(), &cancel)
        .await
        .unwrap();

    assert_eq!(same, ada);
}

#[tokio::test]
async fn test_update_missing_user_is_not_found() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let update = UpdateUser {
        locale: Change::Set("fr".to_string()),
        ..Default::default()
    };
    let err = service.update(404, update, &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::NotFound { id: 404 }));
}

#[tokio::test]
async fn test_metadata_is_replaced_not_merged() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service
        .create(
            CreateUser {
                metadata: Some(json!({ "a": 1, "b": 2 })),
                ..named("Ada")
            },
            &cancel,
        )
        .await
        .unwrap();

    let updated = service
        .update_metadata(ada.id, Some(json!({ "c": 3 })), &cancel)
        .await
        .unwrap();
    assert_eq!(updated.metadata, Some(json!({ "c": 3 })));

    let cleared = service.update_metadata(ada.id, None, &cancel).await.unwrap();
    assert_eq!(cleared.metadata, None);
}

#[tokio::test]
async fn test_double_flip_restores_value() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service.create(named("Ada"), &cancel).await.unwrap();

    let once = service.toggle_disabled(ada.id, &cancel).await.unwrap();
    assert!(once.disabled);
    let twice = service.toggle_disabled(ada.id, &cancel).await.unwrap();
    assert!(!twice.disabled);

    let once = service.toggle_anonymous(ada.id, &cancel).await.unwrap();
    assert!(once.is_anonymous);
    let twice = service.toggle_anonymous(ada.id, &cancel).await.unwrap();
    assert!(!twice.is_anonymous);
    assert!(twice.updated_at > ada.updated_at);
}

#[tokio::test]
async fn test_set_to_is_idempotent() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service.create(named("Ada"), &cancel).await.unwrap();

    for _ in 0..2 {
        let user = service.set_disabled(ada.id, true, &cancel).await.unwrap();
        assert!(user.disabled);
        let user = service.set_anonymous(ada.id, true, &cancel).await.unwrap();
        assert!(user.is_anonymous);
    }

    let err = service.set_disabled(999, true, &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::NotFound { id: 999 }));
    let err = service.toggle_anonymous(999, &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::NotFound { id: 999 }));
}

#[tokio::test]
async fn test_flip_rereads_after_concurrent_write() {
    let store = Arc::new(InterferingStore::new(false));
    let service = UserService::new(store.clone());
    let cancel = CancellationToken::new();

    let ada = service.create(named("Ada"), &cancel).await.unwrap();
    assert!(!ada.disabled);

    // The concurrent writer sets disabled=true first; the flip must see it
    let flipped = service.toggle_disabled(ada.id, &cancel).await.unwrap();
    assert!(!flipped.disabled);
    assert_eq!(flipped.version, 3);
}

#[tokio::test]
async fn test_persistent_conflicts_surface_as_contended() {
    let store = Arc::new(InterferingStore::new(true));
    let service = UserService::new(store);
    let cancel = CancellationToken::new();

    let ada = service.create(named("Ada"), &cancel).await.unwrap();
    let err = service.toggle_disabled(ada.id, &cancel).await.unwrap_err();

    assert!(matches!(err, UserError::Contended { id } if id == ada.id));
}

#[tokio::test]
async fn test_delete_finality() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service.create(named("Ada"), &cancel).await.unwrap();
    service.delete(ada.id, &cancel).await.unwrap();

    let err = service.get(ada.id, &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::NotFound { .. }));

    let err = service.delete(ada.id, &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::NotFound { .. }));
}

#[tokio::test]
async fn test_delete_all_counts() {
    let (service, store) = service();
    let cancel = CancellationToken::new();

    service.create(named("Ada"), &cancel).await.unwrap();
    service.create(named("Grace"), &cancel).await.unwrap();

    assert_eq!(service.delete_all(&cancel).await.unwrap(), 2);
    assert_eq!(service.delete_all(&cancel).await.unwrap(), 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_id_collision_draws_again() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();

    let first = UserService::with_id_allocator(store.clone(), SequenceIds::new(&[7]));
    assert_eq!(first.create(named("Ada"), &cancel).await.unwrap().id, 7);

    let second = UserService::with_id_allocator(store.clone(), SequenceIds::new(&[7, 7, 8]));
    let grace = second.create(named("Grace"), &cancel).await.unwrap();
    assert_eq!(grace.id, 8);

    // The original record was not overwritten
    assert_eq!(first.get(7, &cancel).await.unwrap().name, "Ada");
}

#[tokio::test]
async fn test_id_allocation_exhaustion() {
    let store = Arc::new(MemoryStore::new());
    let cancel = CancellationToken::new();
    let service = UserService::with_id_allocator(store.clone(), SequenceIds::new(&[7]));

    service.create(named("Ada"), &cancel).await.unwrap();
    let err = service.create(named("Grace"), &cancel).await.unwrap_err();

    assert!(matches!(
        err,
        UserError::IdAllocationExhausted { attempts } if attempts == MAX_ID_ATTEMPTS
    ));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_cancelled_operations_write_nothing() {
    let (service, store) = service();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = service.create(named("Ada"), &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::Cancelled));
    assert!(store.is_empty().await);

    let live = CancellationToken::new();
    let ada = service.create(named("Ada"), &live).await.unwrap();
    let err = service.toggle_disabled(ada.id, &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::Cancelled));
    assert!(!service.get(ada.id, &live).await.unwrap().disabled);
}

#[tokio::test]
async fn test_blank_name_is_invalid() {
    let (service, store) = service();
    let cancel = CancellationToken::new();

    let err = service.create(named("  "), &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::InvalidInput { field: "name", .. }));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_over_long_fields_are_invalid() {
    let (service, store) = service();
    let cancel = CancellationToken::new();

    let err = service
        .create(
            CreateUser {
                active_mfa_type: Some("z".repeat(MAX_ACTIVE_MFA_TYPE_LEN + 1)),
                ..named("Ada")
            },
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, UserError::InvalidInput { field: "active_mfa_type", .. }));
    assert!(store.is_empty().await);

    let ada = service.create(named("Ada"), &cancel).await.unwrap();
    let update = UpdateUser {
        phone: Change::Set(Some("9".repeat(MAX_PHONE_LEN + 1))),
        locale: Change::Set("x".repeat(MAX_LOCALE_LEN + 1)),
        ..Default::default()
    };
    let err = service.update(ada.id, update, &cancel).await.unwrap_err();
    assert!(matches!(err, UserError::InvalidInput { .. }));
    assert_eq!(service.get(ada.id, &cancel).await.unwrap(), ada);
}

#[tokio::test]
async fn test_name_is_trimmed_on_create_and_update() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service.create(named(" Ada "), &cancel).await.unwrap();
    assert_eq!(ada.name, "Ada");

    let update = UpdateUser {
        name: Change::Set("  Ada L. ".to_string()),
        ..Default::default()
    };
    let updated = service.update(ada.id, update, &cancel).await.unwrap();
    assert_eq!(updated.name, "Ada L.");
}

#[tokio::test]
async fn test_create_result_matches_stored_record() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service.create(named("Ada"), &cancel).await.unwrap();
    assert_eq!(ada.created_at.timestamp_subsec_nanos() % 1_000, 0);
    assert_eq!(ada.created_at, ada.updated_at);
    assert_eq!(service.get(ada.id, &cancel).await.unwrap(), ada);
}

#[tokio::test]
async fn test_password_is_hashed_and_verifiable() {
    let (service, _) = service();
    let cancel = CancellationToken::new();
    let secret = "s3cret-passphrase";

    let ada = service
        .create(
            CreateUser {
                password: Some(secret.to_string()),
                ..named("Ada")
            },
            &cancel,
        )
        .await
        .unwrap();

    let hash = ada.password_hash.clone().unwrap();
    assert_ne!(hash, secret);
    assert!(hash.starts_with("$argon2id$"));

    assert!(service
        .verify_password(ada.id, secret.to_string(), &cancel)
        .await
        .unwrap());
    assert!(!service
        .verify_password(ada.id, "wrong".to_string(), &cancel)
        .await
        .unwrap());

    let body = serde_json::to_string(&UserResponse::from(&ada)).unwrap();
    assert!(!body.contains(secret));
    assert!(!body.contains(&hash));
}

#[tokio::test]
async fn test_set_password_replaces_hash() {
    let (service, _) = service();
    let cancel = CancellationToken::new();

    let ada = service.create(named("Ada"), &cancel).await.unwrap();
    assert!(!service
        .verify_password(ada.id, "anything".to_string(), &cancel)
        .await
        .unwrap());

    let updated = service
        .set_password(ada.id, "new-passphrase".to_string(), &cancel)
        .await
        .unwrap();
    assert!(updated.password_hash.is_some());
    assert!(service
        .verify_password(ada.id, "new-passphrase".to_string(), &cancel)
        .await
        .unwrap());

    let err = service
        .set_password(ada.id, String::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, UserError::InvalidInput { field: "password", .. }));

    let err = service
        .set_password(404, "whatever".to_string(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, UserError::NotFound { id: 404 }));
}

#[tokio::test]
async fn test_concurrent_creates_share_one_email() {
    let (service, store) = service();
    let cancel = CancellationToken::new();

    let attempts = (0..8).map(|i| {
        let service = service.clone();
        let cancel = cancel.clone();
        async move {
            service
                .create(with_email(&format!("user-{}", i), "same@x.io"), &cancel)
                .await
        }
    });
    let results = futures::future::join_all(attempts).await;

    let created = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(created, 1);
    assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
        e,
        UserError::DuplicateField {
            field: UniqueField::Email
        }
    )));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_flips_are_each_applied_once() {
    let (service, _) = service();
    let cancel = CancellationToken::new();
    let ada = service.create(named("Ada"), &cancel).await.unwrap();

    let flips = (0..5).map(|_| {
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.toggle_disabled(ada.id, &cancel).await }
    });
    let results = futures::future::join_all(flips).await;

    let applied = results.iter().filter(|r| r.is_ok()).count();
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, UserError::Contended { .. })));

    let stored = service.get(ada.id, &cancel).await.unwrap();
    assert_eq!(stored.disabled, applied % 2 == 1);
    assert_eq!(stored.version, 1 + applied as i64);
}
