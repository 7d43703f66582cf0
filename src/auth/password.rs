use crate::error::{AppError, AppResult};

/// Hash a password with bcrypt at the default cost.
pub fn hash(plaintext: &str) -> AppResult<String> {
    bcrypt::hash(plaintext, bcrypt::DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("bcrypt hash failed: {}", e)))
}

/// Verify a plaintext password against a stored hash. Constant-time via bcrypt;
/// a malformed hash simply fails verification.
pub fn verify(plaintext: &str, hashed: &str) -> bool {
    bcrypt::verify(plaintext, hashed).unwrap_or(false)
}
