use actix_web::{HttpResponse, Result, web};

use auth_services::middleware::AuthenticatedUser;
use auth_services::service::AccountManager;
use auth_services::types::*;

/// Returns the account of the authenticated caller.
pub async fn get_account(
    manager: web::Data<AccountManager>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AuthError> {
    let account = manager.get_current(user.username()).await?;

    Ok(HttpResponse::Ok().json(account))
}

/// Creates a new account. The response never carries the password.
pub async fn create_account(
    manager: web::Data<AccountManager>,
    request: web::Json<CreateAccountRequest>,
) -> Result<HttpResponse, AuthError> {
    let account = manager.create(&request).await?;

    Ok(HttpResponse::Ok().json(account))
}

/// Changes the caller's password (`newPassword` + `password`) or email.
pub async fn update_account(
    manager: web::Data<AccountManager>,
    user: AuthenticatedUser,
    request: web::Json<UpdateAccountRequest>,
) -> Result<HttpResponse, AuthError> {
    manager.apply_update(user.username(), &request).await?;

    Ok(HttpResponse::Ok().finish())
}

/// Deletes the account with the given id. Administrators only.
pub async fn delete_account(
    manager: web::Data<AccountManager>,
    user: AuthenticatedUser,
    path: web::Path<String>,
) -> Result<HttpResponse, AuthError> {
    user.require_role(Role::Administrator)?;

    let id = path.into_inner();
    log::warn!("🚨 User {} deleting account {}", user.username(), id);
    manager.delete(&id).await?;

    Ok(HttpResponse::Ok().finish())
}
