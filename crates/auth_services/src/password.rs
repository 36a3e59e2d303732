use bcrypt::{DEFAULT_COST, hash, verify};

use crate::types::AuthError;

/// Minimum password length accepted by [`PasswordPolicy`].
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// One-way password hashing backed by bcrypt.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    /// Creates a hasher with the given bcrypt cost.
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Creates a hasher using `BCRYPT_COST` from the environment, or the bcrypt default.
    pub fn from_env() -> Self {
        let cost = std::env::var("BCRYPT_COST")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_COST);
        Self::new(cost)
    }

    /// Hashes a password with a fresh salt. Fails on empty input.
    pub fn hash(&self, plaintext: &str) -> Result<String, AuthError> {
        if plaintext.is_empty() {
            return Err(AuthError::validation("Password is required."));
        }

        Ok(hash(plaintext, self.cost)?)
    }

    /// Checks a password against a stored hash. Malformed hashes never match.
    pub fn verify(&self, plaintext: &str, password_hash: &str) -> bool {
        if plaintext.is_empty() {
            return false;
        }

        verify(plaintext, password_hash).unwrap_or(false)
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_COST)
    }
}

/// Password strength rules: at least eight characters and one uppercase letter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PasswordPolicy;

impl PasswordPolicy {
    /// Returns one message per violated rule; empty when the password is acceptable.
    pub fn violations(&self, password: &str) -> Vec<String> {
        let mut causes = Vec::new();

        if password.chars().count() < MIN_PASSWORD_LENGTH {
            causes.push(format!(
                "Passwords must be at least {} characters.",
                MIN_PASSWORD_LENGTH
            ));
        }

        if !password.chars().any(|c| c.is_ascii_uppercase()) {
            causes.push("Passwords must have at least one uppercase ('A'-'Z').".to_string());
        }

        causes
    }
}
