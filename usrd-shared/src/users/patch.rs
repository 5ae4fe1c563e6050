/// Partial-update engine
///
/// A [`ChangeSet`] holds one [`Change`] per updatable field. Applying it to a
/// stored record overwrites exactly the `Set` fields and leaves the rest
/// bit-identical.
///
/// "Leave unchanged" and "set to empty" are different inputs:
///
/// | Input                     | `Change`              | Result            |
/// |---------------------------|-----------------------|-------------------|
/// | key absent                | `Unchanged`           | prior value kept  |
/// | `"avatar_url": null`      | `Set(None)`           | cleared           |
/// | `"avatar_url": ""`        | `Set(Some(""))`       | cleared           |
/// | `"avatar_url": "https:…"` | `Set(Some("https:…"))`| replaced          |
///
/// `id`, `created_at` and `version` have no slot in a change-set and so can
/// never be written through it. Secrets are not hashed here: callers put an
/// already-hashed value in `password_hash`.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::error::{UserError, UserResult};
use crate::models::user::{
    UniqueField, UpdateUser, User, MAX_ACTIVE_MFA_TYPE_LEN, MAX_AVATAR_URL_LEN,
    MAX_DEFAULT_ROLE_LEN, MAX_EMAIL_LEN, MAX_LOCALE_LEN, MAX_NAME_LEN, MAX_PASSWORD_HASH_LEN,
    MAX_PHONE_LEN, MAX_TOTP_SECRET_LEN, MAX_USERNAME_LEN,
};

/// Per-field change: keep the stored value or replace it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    /// Leave the stored value untouched
    Unchanged,

    /// Overwrite the stored value
    Set(T),
}

impl<T> Default for Change<T> {
    fn default() -> Self {
        Change::Unchanged
    }
}

impl<T> Change<T> {
    /// Whether this change overwrites the field
    pub fn is_set(&self) -> bool {
        matches!(self, Change::Set(_))
    }

    /// The new value, if any
    pub fn as_set(&self) -> Option<&T> {
        match self {
            Change::Set(value) => Some(value),
            Change::Unchanged => None,
        }
    }
}

/// Present keys deserialize to `Set`; absent keys fall back to
/// `Default` (`Unchanged`) through `#[serde(default)]` on the container.
impl<'de, T: Deserialize<'de>> Deserialize<'de> for Change<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        T::deserialize(deserializer).map(Change::Set)
    }
}

/// Sparse set of field changes for one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub name: Change<String>,
    pub username: Change<Option<String>>,
    pub email: Change<Option<String>>,
    pub phone: Change<Option<String>>,
    pub disabled: Change<bool>,
    pub avatar_url: Change<Option<String>>,
    pub locale: Change<String>,
    pub password_hash: Change<Option<String>>,
    pub default_role: Change<String>,
    pub is_anonymous: Change<bool>,
    pub totp_secret: Change<Option<String>>,
    pub active_mfa_type: Change<Option<String>>,
    pub metadata: Change<Option<JsonValue>>,
}

impl From<UpdateUser> for ChangeSet {
    fn from(update: UpdateUser) -> Self {
        Self {
            name: update.name,
            username: update.username,
            email: update.email,
            phone: update.phone,
            disabled: update.disabled,
            avatar_url: update.avatar_url,
            locale: update.locale,
            default_role: update.default_role,
            is_anonymous: update.is_anonymous,
            totp_secret: update.totp_secret,
            active_mfa_type: update.active_mfa_type,
            ..Default::default()
        }
    }
}

impl ChangeSet {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        *self == ChangeSet::default()
    }

    /// Unique fields this change-set writes
    pub fn unique_fields(&self) -> Vec<UniqueField> {
        let mut fields = Vec::new();
        if self.username.is_set() {
            fields.push(UniqueField::Username);
        }
        if self.email.is_set() {
            fields.push(UniqueField::Email);
        }
        if self.phone.is_set() {
            fields.push(UniqueField::Phone);
        }
        fields
    }

    /// Produces the merged record to persist
    ///
    /// `updated_at` is moved strictly forward even if the clock has not
    /// advanced past the stored value.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when a required text field (`name`, `locale`,
    /// `default_role`) is set to a blank string, or when any text field is
    /// wider than its column.
    pub fn apply(&self, current: &User, now: DateTime<Utc>) -> UserResult<User> {
        let mut next = current.clone();

        if let Change::Set(name) = &self.name {
            next.name = required_text("name", name, MAX_NAME_LEN)?;
        }
        if let Change::Set(username) = &self.username {
            next.username = optional_text("username", username.clone(), MAX_USERNAME_LEN)?;
        }
        if let Change::Set(email) = &self.email {
            next.email = optional_text("email", email.clone(), MAX_EMAIL_LEN)?;
        }
        if let Change::Set(phone) = &self.phone {
            next.phone = optional_text("phone", phone.clone(), MAX_PHONE_LEN)?;
        }
        if let Change::Set(disabled) = self.disabled {
            next.disabled = disabled;
        }
        if let Change::Set(avatar_url) = &self.avatar_url {
            next.avatar_url = optional_text("avatar_url", avatar_url.clone(), MAX_AVATAR_URL_LEN)?;
        }
        if let Change::Set(locale) = &self.locale {
            next.locale = required_text("locale", locale, MAX_LOCALE_LEN)?;
        }
        if let Change::Set(password_hash) = &self.password_hash {
            next.password_hash =
                optional_text("password_hash", password_hash.clone(), MAX_PASSWORD_HASH_LEN)?;
        }
        if let Change::Set(default_role) = &self.default_role {
            next.default_role = required_text("default_role", default_role, MAX_DEFAULT_ROLE_LEN)?;
        }
        if let Change::Set(is_anonymous) = self.is_anonymous {
            next.is_anonymous = is_anonymous;
        }
        if let Change::Set(totp_secret) = &self.totp_secret {
            next.totp_secret = optional_text("totp_secret", totp_secret.clone(), MAX_TOTP_SECRET_LEN)?;
        }
        if let Change::Set(active_mfa_type) = &self.active_mfa_type {
            next.active_mfa_type =
                optional_text("active_mfa_type", active_mfa_type.clone(), MAX_ACTIVE_MFA_TYPE_LEN)?;
        }
        if let Change::Set(metadata) = &self.metadata {
            next.metadata = metadata.clone();
        }

        // Postgres keeps microseconds, so step by at least one
        next.updated_at = now
            .trunc_subsecs(6)
            .max(current.updated_at + Duration::microseconds(1));
        Ok(next)
    }
}

/// Blank optional text is stored as absent
pub(crate) fn optional_text(
    field: &'static str,
    value: Option<String>,
    max: usize,
) -> UserResult<Option<String>> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => {
            check_len(field, &v, max)?;
            Ok(Some(v))
        }
        None => Ok(None),
    }
}

/// Trimmed, non-blank text within the column width
pub(crate) fn required_text(field: &'static str, value: &str, max: usize) -> UserResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(UserError::invalid(field, "must not be empty"));
    }
    check_len(field, value, max)?;
    Ok(value.to_string())
}

fn check_len(field: &'static str, value: &str, max: usize) -> UserResult<()> {
    if value.chars().count() > max {
        return Err(UserError::invalid(
            field,
            format!("must be at most {} characters", max),
        ));
    }
    Ok(())
}
