use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

use crate::secrets::{SIGNING_KEY_SECRET, SecretSource};
use crate::types::{AuthError, Claims, User};

/// Default token lifetime in minutes.
pub const DEFAULT_TTL_MINUTES: i64 = 60;

/// Default tolerated clock skew when checking expiry.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 300;

/// Longest accepted token lifetime: one year.
pub const MAX_TTL_MINUTES: i64 = 365 * 24 * 60;

/// Largest accepted clock skew: one day.
pub const MAX_CLOCK_SKEW_SECS: i64 = 24 * 60 * 60;

/// Settings controlling token issuance and validation
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSettings {
    /// Token lifetime in minutes
    pub ttl_minutes: i64,
    /// Expected `iss` claim; not checked when `None`
    pub issuer: Option<String>,
    /// Expected `aud` claim; not checked when `None`
    pub audience: Option<String>,
    /// Seconds a token is still accepted after `exp`
    pub clock_skew_secs: i64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            ttl_minutes: DEFAULT_TTL_MINUTES,
            issuer: None,
            audience: None,
            clock_skew_secs: DEFAULT_CLOCK_SKEW_SECS,
        }
    }
}

impl TokenSettings {
    /// Reads `JWT_EXPIRE_MINUTES`, `JWT_ISSUER`, `JWT_AUDIENCE` and `JWT_CLOCK_SKEW_SECS`.
    pub fn from_env() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Self {
            ttl_minutes: bounded_setting(
                "JWT_EXPIRE_MINUTES",
                non_empty("JWT_EXPIRE_MINUTES").as_deref(),
                1..=MAX_TTL_MINUTES,
                DEFAULT_TTL_MINUTES,
            ),
            issuer: non_empty("JWT_ISSUER"),
            audience: non_empty("JWT_AUDIENCE"),
            clock_skew_secs: bounded_setting(
                "JWT_CLOCK_SKEW_SECS",
                non_empty("JWT_CLOCK_SKEW_SECS").as_deref(),
                0..=MAX_CLOCK_SKEW_SECS,
                DEFAULT_CLOCK_SKEW_SECS,
            ),
        }
    }
}

/// Parses an integer setting, falling back to `default` when it is missing,
/// malformed or outside `range`.
fn bounded_setting(
    name: &str,
    raw: Option<&str>,
    range: RangeInclusive<i64>,
    default: i64,
) -> i64 {
    let Some(raw) = raw else {
        return default;
    };

    match raw.trim().parse::<i64>() {
        Ok(value) if range.contains(&value) => value,
        _ => {
            log::warn!(
                "Ignoring {}={}: expected an integer in {}..={}, using {}",
                name,
                raw,
                range.start(),
                range.end(),
                default
            );
            default
        }
    }
}

/// Where the signing key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Supplied directly through configuration
    Configured,
    /// Fetched from the secret vault
    Vault,
    /// Generated at startup; tokens do not survive a restart
    Ephemeral,
}

impl KeyMode {
    /// False only for the ephemeral fallback.
    pub fn is_secure(&self) -> bool {
        !matches!(self, KeyMode::Ephemeral)
    }

    /// Lowercase name used in logs and health output.
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyMode::Configured => "configured",
            KeyMode::Vault => "vault",
            KeyMode::Ephemeral => "ephemeral",
        }
    }
}

/// Symmetric key material used to sign and verify tokens
#[derive(Clone)]
pub struct SigningKey {
    secret: Vec<u8>,
    mode: KeyMode,
}

impl SigningKey {
    /// Wraps a key obtained from the given source.
    pub fn new(secret: impl Into<Vec<u8>>, mode: KeyMode) -> Self {
        Self {
            secret: secret.into(),
            mode,
        }
    }

    /// Generates a random 256-bit key.
    pub fn ephemeral() -> Self {
        let secret: [u8; 32] = rand::random();
        Self::new(secret.to_vec(), KeyMode::Ephemeral)
    }

    /// Where the key came from.
    pub fn mode(&self) -> KeyMode {
        self.mode
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("secret", &"<redacted>")
            .field("mode", &self.mode)
            .finish()
    }
}

/// Resolves the signing key: configured value first, then the secret source,
/// then a random per-process key. Never fails.
pub async fn resolve_signing_key(
    configured: Option<&str>,
    source: Option<&dyn SecretSource>,
) -> SigningKey {
    if let Some(key) = configured.filter(|k| !k.is_empty()) {
        log::info!("🔑 Using configured token signing key");
        return SigningKey::new(key.as_bytes(), KeyMode::Configured);
    }

    match source {
        Some(source) => match source.get_secret(SIGNING_KEY_SECRET).await {
            Ok(secret) if !secret.is_empty() => {
                log::info!("🔑 Token signing key loaded from secret vault");
                return SigningKey::new(secret.into_bytes(), KeyMode::Vault);
            }
            Ok(_) => log::warn!("Secret vault returned an empty token signing key"),
            Err(e) => log::warn!("Failed to fetch token signing key from vault: {}", e),
        },
        None => log::warn!("No token signing key configured and no secret vault available"),
    }

    log::warn!("⚠️ Falling back to an ephemeral signing key; tokens will not survive a restart");
    SigningKey::ephemeral()
}

/// Issues and validates HS256 bearer tokens
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    settings: TokenSettings,
    mode: KeyMode,
}

impl TokenIssuer {
    /// Creates an issuer signing with `key`.
    pub fn new(key: &SigningKey, settings: TokenSettings) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(&key.secret),
            decoding_key: DecodingKey::from_secret(&key.secret),
            settings,
            mode: key.mode,
        }
    }

    /// Where the signing key came from.
    pub fn key_mode(&self) -> KeyMode {
        self.mode
    }

    /// Settings the issuer was built with.
    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Issues a token for `user`, valid from now for the configured lifetime.
    pub fn issue(&self, user: &User) -> Result<String, AuthError> {
        self.issue_at(user, Utc::now())
    }

    /// Issues a token as if the current time were `now`.
    pub fn issue_at(&self, user: &User, now: DateTime<Utc>) -> Result<String, AuthError> {
        if self.settings.ttl_minutes <= 0 {
            return Err(AuthError::Internal(format!(
                "token lifetime must be positive, got {} minutes",
                self.settings.ttl_minutes
            )));
        }
        let expires_at = Duration::try_minutes(self.settings.ttl_minutes)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| AuthError::Internal("token expiry overflow".to_string()))?;

        let claims = Claims {
            sub: user.username.clone(),
            jti: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            roles: user.roles.iter().map(|r| r.to_string()).collect(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Validates signature, expiry and the configured issuer/audience.
    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        self.validate_at(token, Utc::now())
    }

    /// Validates a token as if the current time were `now`.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked below against `now`
        validation.validate_exp = false;
        validation.required_spec_claims = ["exp", "sub"]
            .into_iter()
            .map(String::from)
            .collect::<HashSet<_>>();

        if let Some(issuer) = &self.settings.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.settings.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            log::debug!("Token rejected: {}", e);
            AuthError::InvalidToken
        })?;

        let claims = token_data.claims;
        if claims.exp.saturating_add(self.settings.clock_skew_secs) < now.timestamp() {
            log::debug!("Token rejected: expired at {}", claims.exp);
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}
