//! # Web Handlers for the Login Service
//!
//! This crate provides the HTTP handlers and route table of the login service.

/// Account handlers (get/create/update/delete)
mod account_handlers;
pub use account_handlers::*;

/// Login handler
mod login_handlers;
pub use login_handlers::*;

/// Health check handler
mod health_handlers;
pub use health_handlers::*;

/// Route table shared by the server and the tests
mod routes;
pub use routes::*;
