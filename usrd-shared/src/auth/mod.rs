/// Credential handling
///
/// - [`password`]: Argon2id hashing and constant-time verification of
///   user secrets
///
/// Session and token issuance live outside this service.

pub mod password;
