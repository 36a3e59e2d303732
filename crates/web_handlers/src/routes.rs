use actix_web::web;

use auth_services::jwt::TokenIssuer;
use auth_services::middleware::AuthMiddleware;

use crate::{create_account, delete_account, get_account, health, login, update_account};

/// Registers the `/api` routes and the health check. The application must
/// provide a `web::Data<AccountManager>`.
pub fn configure_routes(cfg: &mut web::ServiceConfig, tokens: TokenIssuer) {
    cfg.service(
        web::scope("/api")
            .wrap(AuthMiddleware::new(tokens))
            .service(
                web::resource("/account")
                    .route(web::get().to(get_account))
                    .route(web::post().to(create_account))
                    .route(web::put().to(update_account)),
            )
            .route("/account/{id}", web::delete().to(delete_account))
            .route("/login", web::post().to(login)),
    )
    .route("/health", web::get().to(health));
}
