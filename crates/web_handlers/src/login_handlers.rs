use actix_web::{HttpResponse, Result, web};

use auth_services::service::AccountManager;
use auth_services::types::*;

/// Handles user login by verifying credentials and returning the account
/// details together with a signed token. Any failure is a bare 401.
pub async fn login(
    manager: web::Data<AccountManager>,
    request: web::Json<LoginRequest>,
) -> Result<HttpResponse, AuthError> {
    let username = request.username.as_deref().unwrap_or_default();
    let password = request.password.as_deref().unwrap_or_default();

    let response = manager.login(username, password).await?;

    Ok(HttpResponse::Ok().json(response))
}
