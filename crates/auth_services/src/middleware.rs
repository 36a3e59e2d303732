use actix_web::{
    Error, HttpMessage, Result,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{Ready, ready},
    rc::Rc,
};

use crate::jwt::TokenIssuer;
use crate::types::{AuthError, Claims, Role};

/// Middleware that authenticates requests carrying a valid bearer token by
/// attaching the verified claims to the request.
///
/// Requests without a valid token pass through unauthenticated; handlers that
/// need a caller take an [`AuthenticatedUser`], which rejects them with 401.
#[derive(Clone)]
pub struct AuthMiddleware {
    tokens: TokenIssuer,
}

impl AuthMiddleware {
    /// Creates the middleware validating tokens with `tokens`.
    pub fn new(tokens: TokenIssuer) -> Self {
        Self { tokens }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = AuthMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthMiddlewareService {
            service: Rc::new(service),
            tokens: self.tokens.clone(),
        }))
    }
}

/// Service that implements the authentication middleware logic
pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
    tokens: TokenIssuer,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();

        if let Some(token) = bearer_token(&req) {
            match self.tokens.validate(token) {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                }
                Err(e) => log::debug!("Ignoring bearer token: {}", e),
            }
        }

        Box::pin(async move { service.call(req).await })
    }
}

fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Bearer"))
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}

/// Custom extractor for the verified claims of the caller
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Claims);

impl AuthenticatedUser {
    /// Username carried in the token subject.
    pub fn username(&self) -> &str {
        &self.0.sub
    }

    /// Fails with [`AuthError::Forbidden`] unless the caller holds `role`.
    pub fn require_role(&self, role: Role) -> Result<(), AuthError> {
        if self.0.has_role(role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

impl actix_web::FromRequest for AuthenticatedUser {
    type Error = AuthError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &actix_web::HttpRequest, _: &mut actix_web::dev::Payload) -> Self::Future {
        let claims = req.extensions().get::<Claims>().cloned();

        ready(claims.map(AuthenticatedUser).ok_or(AuthError::InvalidToken))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::{KeyMode, SigningKey, TokenSettings};
    use crate::types::User;
    use actix_web::{App, HttpResponse, http::StatusCode, test, web};

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(
            &SigningKey::new("middleware-key", KeyMode::Configured),
            TokenSettings::default(),
        )
    }

    async fn whoami(user: AuthenticatedUser) -> HttpResponse {
        HttpResponse::Ok().body(user.username().to_string())
    }

    #[actix_web::test]
    async fn valid_token_reaches_handler() {
        let tokens = issuer();
        let user = User {
            id: "id-1".into(),
            username: "alice".into(),
            email: "alice@x.com".into(),
            password_hash: String::new(),
            roles: Default::default(),
        };
        let token = tokens.issue(&user).unwrap();

        let app = test::init_service(
            App::new().service(
                web::scope("/me")
                    .wrap(AuthMiddleware::new(tokens))
                    .route("", web::get().to(whoami)),
            ),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", format!("Bearer {}", token)))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, web::Bytes::from_static(b"alice"));
    }

    async fn public() -> HttpResponse {
        HttpResponse::Ok().finish()
    }

    #[actix_web::test]
    async fn missing_or_bad_token_is_unauthorized() {
        let app = test::init_service(
            App::new().service(
                web::scope("/me")
                    .wrap(AuthMiddleware::new(issuer()))
                    .route("", web::get().to(whoami))
                    .route("/public", web::get().to(public)),
            ),
        )
        .await;

        let anonymous = test::TestRequest::get().uri("/me/public").to_request();
        let resp = test::call_service(&app, anonymous).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let missing = test::TestRequest::get().uri("/me").to_request();
        let resp = test::call_service(&app, missing).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let garbage = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", "Bearer not.a.token"))
            .to_request();
        let resp = test::call_service(&app, garbage).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn bearer_scheme_is_case_insensitive() {
        let tokens = issuer();
        let user = User {
            id: "id-2".into(),
            username: "bob".into(),
            email: "bob@x.com".into(),
            password_hash: String::new(),
            roles: Default::default(),
        };
        let token = tokens.issue(&user).unwrap();

        let app = test::init_service(
            App::new().service(
                web::scope("/me")
                    .wrap(AuthMiddleware::new(tokens))
                    .route("", web::get().to(whoami)),
            ),
        )
        .await;

        for scheme in ["bearer", "BEARER", "Bearer"] {
            let req = test::TestRequest::get()
                .uri("/me")
                .insert_header(("Authorization", format!("{} {}", scheme, token)))
                .to_request();
            let body = test::call_and_read_body(&app, req).await;
            assert_eq!(body, web::Bytes::from_static(b"bob"));
        }

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header(("Authorization", format!("Basic {}", token)))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
