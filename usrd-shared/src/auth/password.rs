/// Credential hashing with Argon2id
///
/// Plaintext secrets are hashed once and only the PHC string is stored.
/// The PHC string carries the algorithm, version, cost parameters and salt,
/// so raising the cost constants below never invalidates existing hashes:
/// verification always uses the parameters embedded in the stored hash.
///
/// # Parameters
///
/// - **Memory**: 64 MB (65536 KiB)
/// - **Iterations**: 3
/// - **Parallelism**: 4 lanes
/// - **Output**: 32 bytes, 16-byte random salt
///
/// # Example
///
/// ```
/// use usrd_shared::auth::password::{hash_password, verify_password};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let hash = hash_password("correct horse battery staple")?;
/// assert!(verify_password("correct horse battery staple", &hash)?);
/// assert!(!verify_password("Tr0ub4dor&3", &hash)?);
/// # Ok(())
/// # }
/// ```

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, ParamsBuilder, Version,
};

/// Memory cost in KiB
pub const MEMORY_COST_KIB: u32 = 65536;

/// Number of passes
pub const TIME_COST: u32 = 3;

/// Degree of parallelism
pub const PARALLELISM: u32 = 4;

/// Hash output length in bytes
pub const OUTPUT_LEN: usize = 32;

/// Error type for password hashing operations
#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    /// Failed to hash password
    #[error("Failed to hash password: {0}")]
    HashError(String),

    /// Failed to verify password
    #[error("Failed to verify password: {0}")]
    VerifyError(String),

    /// Stored hash is not a valid PHC string
    #[error("Invalid password hash format: {0}")]
    InvalidHash(String),
}

fn hasher() -> Result<Argon2<'static>, PasswordError> {
    let params = ParamsBuilder::new()
        .m_cost(MEMORY_COST_KIB)
        .t_cost(TIME_COST)
        .p_cost(PARALLELISM)
        .output_len(OUTPUT_LEN)
        .build()
        .map_err(|e| PasswordError::HashError(format!("Invalid parameters: {}", e)))?;

    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hashes a plaintext secret into a PHC string
///
/// # Errors
///
/// Returns `PasswordError::HashError` if Argon2 rejects the input (for
/// example a secret longer than the algorithm accepts).
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = hasher()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashError(format!("Hash generation failed: {}", e)))?;

    Ok(hash.to_string())
}

/// Checks a plaintext secret against a stored PHC string
///
/// The final digest comparison is constant time, so a mismatch does not
/// reveal how many leading bytes were correct.
///
/// # Returns
///
/// `Ok(false)` for a wrong secret, `Ok(true)` for a match.
///
/// # Errors
///
/// Returns `InvalidHash` if the stored value is not a PHC string and
/// `VerifyError` for any other Argon2 failure.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| PasswordError::InvalidHash(format!("Failed to parse hash: {}", e)))?;

    // Parameters come from the parsed hash, not from the constants above
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerifyError(format!("Verification failed: {}", e))),
    }
}
