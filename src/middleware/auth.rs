use std::rc::Rc;

use actix_service::{forward_ready, Service};
use actix_web::dev::{Payload, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header;
use actix_web::{web, Error, FromRequest, HttpMessage, HttpRequest};
use futures::future::{ok, ready, LocalBoxFuture, Ready};

use crate::auth::token::bearer_token;
use crate::auth::{AuthUser, TokenKeys, TokenPurpose};
use crate::error::{AppError, AppResult};

fn authenticate(req: &HttpRequest) -> AppResult<AuthUser> {
    let keys = req
        .app_data::<web::Data<TokenKeys>>()
        .ok_or_else(|| AppError::internal("token keys are not configured"))?;

    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::Unauthenticated("Authorization header missing".to_string()))?
        .to_str()
        .map_err(|_| AppError::Unauthenticated("Invalid authorization header".to_string()))?;
    let token = bearer_token(header)
        .ok_or_else(|| AppError::Unauthenticated("Invalid authorization scheme".to_string()))?;

    let claims = keys.verify(token, TokenPurpose::Auth)?;
    AuthUser::from_claims(&claims)
}

/// Rejects requests without a valid bearer auth token and makes the
/// caller available to handlers as an `AuthUser` extractor.
pub struct AuthMiddleware;

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Rc::new(service),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Rc<S>,
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

        Box::pin(async move {
            let user = authenticate(req.request())?;
            req.extensions_mut().insert(user);
            service.call(req).await
        })
    }
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let cached = req.extensions().get::<AuthUser>().cloned();
        ready(cached.map_or_else(|| authenticate(req), Ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use actix_web::{test, App, HttpResponse};
    use bson::oid::ObjectId;

    use crate::models::Role;

    async fn whoami(user: AuthUser) -> HttpResponse {
        HttpResponse::Ok().body(user.id.to_hex())
    }

    #[actix_web::test]
    async fn valid_token_reaches_the_handler() {
        let keys = TokenKeys::new("secret");
        let id = ObjectId::new();
        let issued = keys.issue(&id, "a@x.com", Role::User, TokenPurpose::Auth).unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(keys))
                .service(web::scope("").wrap(AuthMiddleware).route("/me", web::get().to(whoami))),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", issued.token)))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, id.to_hex().as_bytes());
    }

    #[actix_web::test]
    async fn missing_or_wrong_purpose_tokens_are_rejected() {
        let keys = TokenKeys::new("secret");
        let reset = keys
            .issue(&ObjectId::new(), "a@x.com", Role::User, TokenPurpose::ResetPassword)
            .unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(keys))
                .service(web::scope("").wrap(AuthMiddleware).route("/me", web::get().to(whoami))),
        )
        .await;

        let req = test::TestRequest::get().uri("/me").to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/me")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", reset.token)))
            .to_request();
        let err = test::try_call_service(&app, req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);
    }
}
