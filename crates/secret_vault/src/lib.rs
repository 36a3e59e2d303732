//! # Secret Vault
//!
//! HTTP client for the secret vault the login service reads its signing key
//! and database password from at startup.

/// Vault client implementation.
pub mod client;

pub use client::VaultClient;
