//! # Auth Services
//!
//! Core of the login service: password hashing, token issuance and
//! validation, the credential-store seam and the account operations built
//! on top of them.

/// Token issuance, validation and signing-key resolution.
pub mod jwt;
/// Middleware for request authentication and the authenticated-user extractor.
pub mod middleware;
/// Password hashing and the password strength policy.
pub mod password;
/// Sources of startup secrets.
pub mod secrets;
/// Role and demo-account bootstrapping.
pub mod seed;
/// Account operations: create, read, update, delete and login.
pub mod service;
/// Credential storage trait and the in-memory implementation.
pub mod store;
/// Types and structures used in authentication services.
pub mod types;
