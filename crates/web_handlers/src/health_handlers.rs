use actix_web::{HttpResponse, Result, web};

use auth_services::service::AccountManager;

/// Health check endpoint; also reports whether tokens are signed with a
/// persistent key or the ephemeral fallback.
pub async fn health(manager: web::Data<AccountManager>) -> Result<HttpResponse> {
    let mode = manager.tokens().key_mode();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "service": "login",
        "status": if mode.is_secure() { "healthy" } else { "degraded" },
        "signing_key": mode.as_str(),
        "timestamp": chrono::Utc::now()
    })))
}
