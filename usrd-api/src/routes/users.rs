/// User record endpoints
///
/// Thin adapters from HTTP onto [`usrd_shared::users::UserService`]. Path ids
/// are parsed here; every call gets a cancellation token that fires when the
/// server shuts down.
///
/// # Endpoints
///
/// - `POST   /system/users` - Create a user
/// - `GET    /system/users` - List users
/// - `DELETE /system/users` - Delete every user
/// - `GET    /system/users/:id` - Fetch one user
/// - `PATCH  /system/users/:id` - Partial update
/// - `DELETE /system/users/:id` - Delete one user
/// - `PUT    /system/users/:id/metadata` - Replace the metadata document
/// - `POST   /system/users/:id/disabled/toggle` - Flip `disabled`
/// - `PUT    /system/users/:id/disabled` - Set `disabled`
/// - `POST   /system/users/:id/anonymous/toggle` - Flip `is_anonymous`
/// - `PUT    /system/users/:id/anonymous` - Set `is_anonymous`
/// - `PUT    /system/users/:id/password` - Replace the secret
/// - `POST   /system/users/:id/password/verify` - Check a secret
///
/// No response ever carries the password hash or the TOTP secret.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use usrd_shared::models::user::{CreateUser, UpdateUser, User, UserId, UserResponse};
use usrd_shared::users::patch::Change;
use validator::Validate;

/// Create user request
#[derive(Default, Deserialize, Validate)]
#[serde(default)]
pub struct CreateUserRequest {
    /// Display name
    #[validate(length(min = 1, max = 255, message = "Name must be between 1 and 255 characters"))]
    pub name: String,

    #[validate(length(max = 255, message = "Username must be at most 255 characters"))]
    pub username: Option<String>,

    #[validate(
        email(message = "Invalid email format"),
        length(max = 320, message = "Email must be at most 320 characters")
    )]
    pub email: Option<String>,

    #[validate(length(max = 64, message = "Phone must be at most 64 characters"))]
    pub phone: Option<String>,

    #[validate(
        url(message = "Invalid avatar URL"),
        length(max = 2048, message = "Avatar URL must be at most 2048 characters")
    )]
    pub avatar_url: Option<String>,

    #[validate(length(max = 32, message = "Locale must be at most 32 characters"))]
    pub locale: Option<String>,

    /// Plaintext secret, hashed by the service
    #[validate(length(max = 1024, message = "Password must be at most 1024 characters"))]
    pub password: Option<String>,

    #[validate(length(max = 255, message = "TOTP secret must be at most 255 characters"))]
    pub totp_secret: Option<String>,

    #[validate(length(max = 32, message = "MFA type must be at most 32 characters"))]
    pub active_mfa_type: Option<String>,

    pub metadata: Option<JsonValue>,
}

impl CreateUserRequest {
    /// Blank optional strings mean "not supplied"
    fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_string(),
            username: blank_to_none(self.username),
            email: blank_to_none(self.email),
            phone: blank_to_none(self.phone),
            avatar_url: blank_to_none(self.avatar_url),
            locale: blank_to_none(self.locale),
            password: self.password.filter(|p| !p.is_empty()),
            totp_secret: blank_to_none(self.totp_secret),
            active_mfa_type: blank_to_none(self.active_mfa_type),
            metadata: self.metadata,
        }
    }
}

impl From<CreateUserRequest> for CreateUser {
    fn from(req: CreateUserRequest) -> Self {
        Self {
            name: req.name,
            username: req.username,
            email: req.email,
            phone: req.phone,
            avatar_url: req.avatar_url,
            locale: req.locale,
            password: req.password,
            totp_secret: req.totp_secret,
            active_mfa_type: req.active_mfa_type,
            metadata: req.metadata,
        }
    }
}

/// Format and width checks for the fields an update actually sets
///
/// Widths mirror the `MAX_*_LEN` limits in `usrd_shared::models::user`.
#[derive(Validate)]
struct UpdateChecks {
    #[validate(length(max = 255, message = "Name must be at most 255 characters"))]
    name: Option<String>,

    #[validate(length(max = 255, message = "Username must be at most 255 characters"))]
    username: Option<String>,

    #[validate(
        email(message = "Invalid email format"),
        length(max = 320, message = "Email must be at most 320 characters")
    )]
    email: Option<String>,

    #[validate(length(max = 64, message = "Phone must be at most 64 characters"))]
    phone: Option<String>,

    #[validate(
        url(message = "Invalid avatar URL"),
        length(max = 2048, message = "Avatar URL must be at most 2048 characters")
    )]
    avatar_url: Option<String>,

    #[validate(length(max = 32, message = "Locale must be at most 32 characters"))]
    locale: Option<String>,

    #[validate(length(max = 64, message = "Default role must be at most 64 characters"))]
    default_role: Option<String>,

    #[validate(length(max = 255, message = "TOTP secret must be at most 255 characters"))]
    totp_secret: Option<String>,

    #[validate(length(max = 32, message = "MFA type must be at most 32 characters"))]
    active_mfa_type: Option<String>,
}

impl From<&UpdateUser> for UpdateChecks {
    fn from(update: &UpdateUser) -> Self {
        let set_text =
            |change: &Change<Option<String>>| blank_to_none(change.as_set().cloned().flatten());

        Self {
            name: update.name.as_set().map(|n| n.trim().to_string()),
            username: set_text(&update.username),
            email: set_text(&update.email),
            phone: set_text(&update.phone),
            avatar_url: set_text(&update.avatar_url),
            locale: update.locale.as_set().map(|l| l.trim().to_string()),
            default_role: update.default_role.as_set().map(|r| r.trim().to_string()),
            totp_secret: set_text(&update.totp_secret),
            active_mfa_type: set_text(&update.active_mfa_type),
        }
    }
}

/// Explicit value for a boolean flag
#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    pub value: bool,
}

/// Plaintext secret, for set and verify
#[derive(Deserialize)]
pub struct PasswordRequest {
    pub password: String,
}

/// Single-user response
#[derive(Debug, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub message: String,
    pub user: UserResponse,
}

impl UserEnvelope {
    fn new(message: &str, user: User) -> Self {
        Self {
            message: message.to_string(),
            user: user.into(),
        }
    }
}

/// List response
#[derive(Debug, Serialize, Deserialize)]
pub struct UsersEnvelope {
    pub message: String,
    pub users: Vec<UserResponse>,
}

/// Response for deletions
#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
    pub deleted: u64,
}

/// Password verification result
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parses a path id into a user id
fn parse_id(raw: &str) -> ApiResult<UserId> {
    raw.parse::<UserId>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid user id '{}'", raw)))
}

/// Create a user
///
/// # Errors
///
/// - `400 Bad Request`: Malformed JSON
/// - `409 Conflict`: Username, email or phone already taken
/// - `422 Unprocessable Entity`: Validation failed
pub async fn create_user(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserEnvelope>)> {
    let Json(req) = payload?;
    let req = req.normalized();
    req.validate()?;

    let user = state
        .users
        .create(req.into(), &state.request_token())
        .await?;

    Ok((StatusCode::CREATED, Json(UserEnvelope::new("user created", user))))
}

/// List all users
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<UsersEnvelope>> {
    let list = state.users.list(&state.request_token()).await?;

    Ok(Json(UsersEnvelope {
        message: list.message,
        users: list.users.iter().map(UserResponse::from).collect(),
    }))
}

/// Fetch one user
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_id(&id)?;
    let user = state.users.get(id, &state.request_token()).await?;

    Ok(Json(UserEnvelope::new("user fetched", user)))
}

/// Partial update
///
/// Keys absent from the body are left unchanged; `null` or `""` clears a
/// nullable field. `password_hash` and `metadata` are rejected here.
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUser>, JsonRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_id(&id)?;
    let Json(update) = payload?;
    UpdateChecks::from(&update).validate()?;

    let user = state
        .users
        .update(id, update, &state.request_token())
        .await?;

    Ok(Json(UserEnvelope::new("user updated", user)))
}

/// Replace the metadata document; a `null` body clears it
pub async fn update_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<Option<JsonValue>>, JsonRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_id(&id)?;
    let Json(metadata) = payload?;

    let user = state
        .users
        .update_metadata(id, metadata, &state.request_token())
        .await?;

    Ok(Json(UserEnvelope::new("user metadata updated", user)))
}

pub async fn toggle_disabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_id(&id)?;
    let user = state
        .users
        .toggle_disabled(id, &state.request_token())
        .await?;

    Ok(Json(UserEnvelope::new("user disabled toggled", user)))
}

pub async fn set_disabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<FlagRequest>, JsonRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_id(&id)?;
    let Json(flag) = payload?;

    let user = state
        .users
        .set_disabled(id, flag.value, &state.request_token())
        .await?;

    Ok(Json(UserEnvelope::new("user disabled updated", user)))
}

pub async fn toggle_anonymous(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_id(&id)?;
    let user = state
        .users
        .toggle_anonymous(id, &state.request_token())
        .await?;

    Ok(Json(UserEnvelope::new("user anonymous toggled", user)))
}

pub async fn set_anonymous(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<FlagRequest>, JsonRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_id(&id)?;
    let Json(flag) = payload?;

    let user = state
        .users
        .set_anonymous(id, flag.value, &state.request_token())
        .await?;

    Ok(Json(UserEnvelope::new("user anonymous updated", user)))
}

/// Replace the stored secret
pub async fn set_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<PasswordRequest>, JsonRejection>,
) -> ApiResult<Json<UserEnvelope>> {
    let id = parse_id(&id)?;
    let Json(req) = payload?;

    let user = state
        .users
        .set_password(id, req.password, &state.request_token())
        .await?;

    Ok(Json(UserEnvelope::new("user password updated", user)))
}

/// Check a secret against the stored hash
pub async fn verify_password(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<PasswordRequest>, JsonRejection>,
) -> ApiResult<Json<VerifyResponse>> {
    let id = parse_id(&id)?;
    let Json(req) = payload?;

    let valid = state
        .users
        .verify_password(id, req.password, &state.request_token())
        .await?;

    Ok(Json(VerifyResponse { valid }))
}

/// Delete one user
///
/// A repeated delete of the same id is `404 Not Found`.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let id = parse_id(&id)?;
    state.users.delete(id, &state.request_token()).await?;

    Ok(Json(DeleteResponse {
        message: "user deleted".to_string(),
        deleted: 1,
    }))
}

/// Delete every user
pub async fn delete_all_users(State(state): State<AppState>) -> ApiResult<Json<DeleteResponse>> {
    let deleted = state.users.delete_all(&state.request_token()).await?;

    Ok(Json(DeleteResponse {
        message: format!("{} users deleted", deleted),
        deleted,
    }))
}
