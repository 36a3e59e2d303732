use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Roles known to the service. The set is fixed and seeded at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Full access, including account deletion
    Administrator,
    /// Owns resources
    Owner,
    /// Can contribute to resources
    Contributor,
    /// Read-only access
    Reader,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 4] = [
        Role::Administrator,
        Role::Owner,
        Role::Contributor,
        Role::Reader,
    ];

    /// Name of the role as stored and as carried in token claims.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Administrator => "Administrator",
            Role::Owner => "Owner",
            Role::Contributor => "Contributor",
            Role::Reader => "Reader",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role name does not match any known role.
#[derive(Debug, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

/// A persisted user account
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Opaque unique identifier (UUID v4 text)
    pub id: String,
    /// Unique login name, case-sensitive as stored
    pub username: String,
    /// Unique email address
    pub email: String,
    /// bcrypt hash of the password
    pub password_hash: String,
    /// Roles held by the user
    pub roles: BTreeSet<Role>,
}

impl User {
    /// Public projection of the user, without the password hash.
    pub fn view(&self) -> UserView {
        UserView {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }

    /// Whether the user holds the given role.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

/// Account details returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    /// Unique identifier for the user
    pub id: String,
    /// Login name of the user
    pub username: String,
    /// Email address of the user
    pub email: String,
}

/// Response structure for a successful login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Unique identifier for the user
    pub id: String,
    /// Login name of the user
    pub username: String,
    /// Email address of the user
    pub email: String,
    /// Signed bearer token
    pub token: String,
}

/// Request structure for account creation
#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    /// Requested login name
    #[serde(default, alias = "userName")]
    pub username: Option<String>,
    /// Email address of the user
    #[serde(default)]
    pub email: Option<String>,
    /// Password for the new account
    #[serde(default)]
    pub password: Option<String>,
}

/// Request structure for account updates.
///
/// A non-empty `new_password` selects a password change (verified against
/// `password`); otherwise a non-empty `email` selects an email change.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    /// Current password, required for a password change
    #[serde(default)]
    pub password: Option<String>,
    /// Replacement password
    #[serde(default)]
    pub new_password: Option<String>,
    /// Replacement email address
    #[serde(default)]
    pub email: Option<String>,
}

/// Request structure for user login
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    /// Login name of the user
    #[serde(default, alias = "userName")]
    pub username: Option<String>,
    /// Password for the user account
    #[serde(default)]
    pub password: Option<String>,
}

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject of the token, the username
    pub sub: String,
    /// Unique token identifier
    pub jti: String,
    /// Identifier of the user the token was issued to
    pub user_id: String,
    /// Role names, one entry per role
    #[serde(rename = "role", default)]
    pub roles: Vec<String>,
    /// Issued at timestamp (seconds since the epoch)
    pub iat: i64,
    /// Expiration timestamp (seconds since the epoch)
    pub exp: i64,
    /// Issuer, when configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience, when configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

impl Claims {
    /// Whether the token carries the given role.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.iter().any(|r| r == role.as_str())
    }

    /// Role names as a set, ignoring order and duplicates.
    pub fn role_set(&self) -> BTreeSet<String> {
        self.roles.iter().cloned().collect()
    }
}

/// Custom error type for authentication-related errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Input was malformed or violated a store constraint; carries every cause
    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),

    /// The identity or target account does not exist
    #[error("User not found")]
    NotFound,

    /// The supplied credentials are invalid
    #[error("Invalid credentials")]
    Unauthorized,

    /// The bearer token is missing, malformed, expired or wrongly signed
    #[error("Invalid or expired token")]
    InvalidToken,

    /// The caller lacks the role required for the operation
    #[error("Forbidden")]
    Forbidden,

    /// The credential store failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An error occurred while hashing the password
    #[error("Password hashing error: {0}")]
    PasswordHash(#[from] bcrypt::BcryptError),

    /// An error occurred while signing a token
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// An invariant was violated
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Validation failure with a single cause.
    pub fn validation(message: impl Into<String>) -> Self {
        AuthError::Validation(vec![message.into()])
    }
}

impl actix_web::ResponseError for AuthError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;

        match self {
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::NotFound => StatusCode::NOT_FOUND,
            AuthError::Unauthorized | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> actix_web::HttpResponse {
        use actix_web::HttpResponse;

        match self {
            AuthError::Validation(_) => HttpResponse::BadRequest().json(serde_json::json!({
                "error": "validation_error",
                "message": self.to_string()
            })),
            AuthError::NotFound => HttpResponse::NotFound().finish(),
            // Deliberately empty: callers must not learn which part of the login failed
            AuthError::Unauthorized => HttpResponse::Unauthorized().finish(),
            AuthError::InvalidToken => HttpResponse::Unauthorized().json(serde_json::json!({
                "error": "invalid_token",
                "message": "Invalid or expired token"
            })),
            AuthError::Forbidden => HttpResponse::Forbidden().finish(),
            other => {
                log::error!("Request failed: {}", other);
                HttpResponse::InternalServerError().json(serde_json::json!({
                    "error": "internal_error",
                    "message": "An internal error occurred"
                }))
            }
        }
    }
}
