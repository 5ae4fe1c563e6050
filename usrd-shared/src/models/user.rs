/// User model
///
/// This module provides the stored `User` record, the creation input, and the
/// outward `UserResponse` representation.
///
/// # Schema
///
/// ```sql
/// CREATE TABLE users (
///     id BIGINT PRIMARY KEY,
///     name VARCHAR(255) NOT NULL,
///     username VARCHAR(255) UNIQUE,
///     email VARCHAR(320) UNIQUE,
///     phone VARCHAR(64) UNIQUE,
///     disabled BOOLEAN NOT NULL DEFAULT FALSE,
///     avatar_url VARCHAR(2048),
///     locale VARCHAR(32) NOT NULL DEFAULT 'en/IN',
///     password_hash VARCHAR(255),
///     default_role VARCHAR(64) NOT NULL DEFAULT 'user',
///     is_anonymous BOOLEAN NOT NULL DEFAULT FALSE,
///     totp_secret VARCHAR(255),
///     active_mfa_type VARCHAR(32),
///     metadata JSONB,
///     version BIGINT NOT NULL DEFAULT 1,
///     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
/// );
/// ```
///
/// # Output
///
/// `User` has no `Serialize` impl. Anything leaving the process
/// goes through [`UserResponse`], which has no field for the password hash or
/// the TOTP secret.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::users::patch::Change;

/// Identifier of a user record
pub type UserId = i64;

/// Locale assigned when the caller does not supply one
pub const DEFAULT_LOCALE: &str = "en/IN";

/// Role assigned to every new user
pub const DEFAULT_ROLE: &str = "user";

// Column widths from the `users` table, in characters
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_USERNAME_LEN: usize = 255;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_PHONE_LEN: usize = 64;
pub const MAX_AVATAR_URL_LEN: usize = 2048;
pub const MAX_LOCALE_LEN: usize = 32;
pub const MAX_PASSWORD_HASH_LEN: usize = 255;
pub const MAX_DEFAULT_ROLE_LEN: usize = 64;
pub const MAX_TOTP_SECRET_LEN: usize = 255;
pub const MAX_ACTIVE_MFA_TYPE_LEN: usize = 32;

/// Identity fields that must be unique across all records when present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueField {
    Username,
    Email,
    Phone,
}

impl UniqueField {
    /// All unique fields, in the order they are checked
    pub const ALL: [UniqueField; 3] = [UniqueField::Username, UniqueField::Email, UniqueField::Phone];

    /// Column / JSON name of the field
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqueField::Username => "username",
            UniqueField::Email => "email",
            UniqueField::Phone => "phone",
        }
    }

    /// Reads this field from a record, treating blank values as absent
    pub fn value_of<'a>(&self, user: &'a User) -> Option<&'a str> {
        let value = match self {
            UniqueField::Username => user.username.as_deref(),
            UniqueField::Email => user.email.as_deref(),
            UniqueField::Phone => user.phone.as_deref(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored user record
///
/// The Record Store is the only durable owner of these. The service never
/// caches them between calls.
#[derive(Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    /// Randomly allocated, never reassigned
    pub id: UserId,

    /// Display name (required)
    pub name: String,

    /// Unique when present
    pub username: Option<String>,

    /// Unique when present
    pub email: Option<String>,

    /// Unique when present
    pub phone: Option<String>,

    /// Whether the account is disabled
    pub disabled: bool,

    /// Optional avatar/profile picture URL
    pub avatar_url: Option<String>,

    /// Preferred locale, defaults to [`DEFAULT_LOCALE`]
    pub locale: String,

    /// Argon2id PHC string. Never a plaintext, never serialized outward.
    pub password_hash: Option<String>,

    /// Defaults to [`DEFAULT_ROLE`]. Opaque: no authorization semantics.
    pub default_role: String,

    /// Whether the account is anonymous
    pub is_anonymous: bool,

    /// TOTP shared secret, stored as supplied
    pub totp_secret: Option<String>,

    /// Active MFA method (e.g. "totp")
    pub active_mfa_type: Option<String>,

    /// Caller-defined document, replaced wholesale on update
    pub metadata: Option<JsonValue>,

    /// Optimistic concurrency counter, bumped by every conditional update
    pub version: i64,

    /// Set once at creation
    pub created_at: DateTime<Utc>,

    /// Refreshed on every mutation
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("disabled", &self.disabled)
            .field("avatar_url", &self.avatar_url)
            .field("locale", &self.locale)
            .field("password_hash", &self.password_hash.as_ref().map(|_| "<redacted>"))
            .field("default_role", &self.default_role)
            .field("is_anonymous", &self.is_anonymous)
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "<redacted>"))
            .field("active_mfa_type", &self.active_mfa_type)
            .field("metadata", &self.metadata)
            .field("version", &self.version)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Input for creating a new user
///
/// Only `name` is required. `password` is a plaintext secret: it is hashed
/// once by the service and then dropped.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateUser {
    pub name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub locale: Option<String>,
    pub password: Option<String>,
    pub totp_secret: Option<String>,
    pub active_mfa_type: Option<String>,
    pub metadata: Option<JsonValue>,
}

impl fmt::Debug for CreateUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateUser")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("avatar_url", &self.avatar_url)
            .field("locale", &self.locale)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("totp_secret", &self.totp_secret.as_ref().map(|_| "<redacted>"))
            .field("active_mfa_type", &self.active_mfa_type)
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Input for the generic update operation
///
/// Each field is independently [`Change::Unchanged`] (key absent) or
/// [`Change::Set`]. For nullable fields `null` and `""` both clear the value.
/// The secret and the metadata document have their own operations and are
/// rejected here as unknown fields.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpdateUser {
    pub name: Change<String>,
    pub username: Change<Option<String>>,
    pub email: Change<Option<String>>,
    pub phone: Change<Option<String>>,
    pub disabled: Change<bool>,
    pub avatar_url: Change<Option<String>>,
    pub locale: Change<String>,
    pub default_role: Change<String>,
    pub is_anonymous: Change<bool>,
    pub totp_secret: Change<Option<String>>,
    pub active_mfa_type: Change<Option<String>>,
}

/// Outward representation of a user
///
/// Built only from a stored [`User`]; secret-derived material is reduced to
/// presence flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: UserId,
    pub name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub disabled: bool,
    pub avatar_url: Option<String>,
    pub locale: String,
    pub default_role: String,
    pub is_anonymous: bool,
    pub active_mfa_type: Option<String>,
    pub metadata: Option<JsonValue>,
    pub has_password: bool,
    pub mfa_enrolled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            disabled: user.disabled,
            avatar_url: user.avatar_url.clone(),
            locale: user.locale.clone(),
            default_role: user.default_role.clone(),
            is_anonymous: user.is_anonymous,
            active_mfa_type: user.active_mfa_type.clone(),
            metadata: user.metadata.clone(),
            has_password: user.password_hash.is_some(),
            mfa_enrolled: user.totp_secret.is_some(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse::from(&user)
    }
}

/// Result of listing all users
#[derive(Debug, Clone)]
pub struct UserList {
    /// Every stored record
    pub users: Vec<User>,

    /// Summary, e.g. "3 users fetched"
    pub message: String,
}
