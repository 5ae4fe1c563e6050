/// Data models for usrd
///
/// # Models
///
/// - `user`: the stored user record, creation/update inputs and the
///   outward response shape
///
/// # Example
///
/// ```
/// use usrd_shared::models::user::{CreateUser, UniqueField};
///
/// let input = CreateUser {
///     name: "Ada".to_string(),
///     email: Some("ada@x.io".to_string()),
///     ..Default::default()
/// };
/// assert_eq!(UniqueField::Email.as_str(), "email");
/// # let _ = input;
/// ```

pub mod user;
