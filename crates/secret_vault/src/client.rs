use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use auth_services::secrets::{SecretError, SecretSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct SecretBundle {
    value: String,
}

/// Reads secrets with `GET {base_url}/secrets/{name}`, answered by
/// `{"value": "..."}`.
#[derive(Debug, Clone)]
pub struct VaultClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl VaultClient {
    /// Create a new vault client for `base_url`, authenticating with `token` when given.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, SecretError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SecretError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Builds a client from `SECRETS_VAULT_URL` and either `SECRETS_VAULT_TOKEN`
    /// or the file named by `SECRETS_VAULT_TOKEN_FILE`.
    pub fn from_env() -> Result<Self, SecretError> {
        let base_url = std::env::var("SECRETS_VAULT_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SecretError::NotConfigured("SECRETS_VAULT_URL not set".to_string()))?;

        let token = match std::env::var("SECRETS_VAULT_TOKEN") {
            Ok(token) => Some(token),
            Err(_) => match std::env::var("SECRETS_VAULT_TOKEN_FILE") {
                Ok(path) => Some(
                    std::fs::read_to_string(&path)
                        .map_err(|e| {
                            SecretError::NotConfigured(format!(
                                "Unable to read vault token file {}: {}",
                                path, e
                            ))
                        })?
                        .trim()
                        .to_string(),
                ),
                Err(_) => None,
            },
        };

        Self::new(base_url, token)
    }

    fn secret_url(&self, name: &str) -> String {
        format!("{}/secrets/{}", self.base_url, name)
    }
}

#[async_trait]
impl SecretSource for VaultClient {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        log::debug!("Reading secret {} from vault", name);

        let mut request = self.client.get(self.secret_url(name));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SecretError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(SecretError::NotFound(name.to_string())),
            status if !status.is_success() => {
                return Err(SecretError::Unavailable(format!(
                    "vault answered {} for secret {}",
                    status, name
                )));
            }
            _ => {}
        }

        let bundle: SecretBundle = response
            .json()
            .await
            .map_err(|e| SecretError::Unavailable(format!("Malformed secret response: {}", e)))?;

        Ok(bundle.value)
    }
}
