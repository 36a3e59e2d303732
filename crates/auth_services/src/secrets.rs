use async_trait::async_trait;

/// Name of the secret holding the token signing key.
pub const SIGNING_KEY_SECRET: &str = "token-sign-key";

/// Name of the secret substituted for `<password>` in the database URL.
pub const DATABASE_PASSWORD_SECRET: &str = "sql-password";

/// Errors returned by a [`SecretSource`]
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// The source is not configured
    #[error("Secret source not configured: {0}")]
    NotConfigured(String),

    /// The secret does not exist
    #[error("Secret '{0}' not found")]
    NotFound(String),

    /// The source could not be reached or answered with an error
    #[error("Secret source unavailable: {0}")]
    Unavailable(String),
}

/// A place secrets can be fetched from at startup, such as a vault service.
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetches the current value of the named secret.
    async fn get_secret(&self, name: &str) -> Result<String, SecretError>;
}
