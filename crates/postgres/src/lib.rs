//! # Postgres
//!
//! This crate provides PostgreSQL persistence for the login service: the
//! connection pool, schema migrations and the credential store.

/// Credential store backed by PostgreSQL.
pub mod credential_store;
/// Database connection and migration utilities.
pub mod database;

pub use credential_store::PgCredentialStore;
