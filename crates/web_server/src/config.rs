use anyhow::{Context, bail};

use auth_services::jwt::TokenSettings;
use auth_services::password::PasswordHasher;
use auth_services::secrets::{DATABASE_PASSWORD_SECRET, SecretSource};

/// Address the server binds to when `BIND_ADDRESS` is unset.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:4201";

const PASSWORD_PLACEHOLDER: &str = "<password>";

/// Server settings read once at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub cors_origins: Vec<String>,
    pub database_url: Option<String>,
    pub jwt_key: Option<String>,
    pub telemetry_key: Option<String>,
    pub seed_demo_users: bool,
    pub tokens: TokenSettings,
    pub hasher: PasswordHasher,
}

impl ServiceConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(
            |name| std::env::var(name).ok(),
            TokenSettings::from_env(),
            PasswordHasher::from_env(),
        )
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        tokens: TokenSettings,
        hasher: PasswordHasher,
    ) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            cors_origins: var("CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(str::trim)
                        .filter(|o| !o.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            database_url: var("DATABASE_URL"),
            jwt_key: var("JWT_KEY"),
            telemetry_key: var("TELEMETRY_KEY"),
            seed_demo_users: var("SEED_DEMO_USERS")
                .map(|v| !matches!(v.trim().to_lowercase().as_str(), "false" | "0" | "no"))
                .unwrap_or(true),
            tokens,
            hasher,
        }
    }
}

/// Substitutes the `<password>` placeholder in a database URL with the
/// database password held by the secret source.
pub async fn resolve_database_url(
    url: &str,
    source: Option<&dyn SecretSource>,
) -> anyhow::Result<String> {
    if !url.contains(PASSWORD_PLACEHOLDER) {
        return Ok(url.to_string());
    }

    let Some(source) = source else {
        bail!("DATABASE_URL contains a password placeholder but no secret vault is configured");
    };

    let password = source
        .get_secret(DATABASE_PASSWORD_SECRET)
        .await
        .context("Failed to fetch the database password")?;

    Ok(url.replace(PASSWORD_PLACEHOLDER, &password))
}
