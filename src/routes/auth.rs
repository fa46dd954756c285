use actix_web::{web, HttpResponse};
use serde_json::json;

use super::{created, ok};
use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::middleware::{AuthMiddleware, Limiters, RateLimit};
use crate::models::user::{
    ChangePasswordInput, ForgotPasswordInput, LoginInput, RegisterInput, ResetPasswordInput,
    TokenInput, UpdateProfileInput,
};
use crate::services::AccountService;

async fn register(
    accounts: web::Data<AccountService>,
    input: web::Json<RegisterInput>,
) -> AppResult<HttpResponse> {
    let payload = accounts.register(input.into_inner()).await?;
    Ok(created("User registered successfully", payload))
}

async fn login(
    accounts: web::Data<AccountService>,
    input: web::Json<LoginInput>,
) -> AppResult<HttpResponse> {
    let payload = accounts.login(input.into_inner()).await?;
    Ok(ok("Login successful", payload))
}

async fn verify_email(
    accounts: web::Data<AccountService>,
    input: web::Json<TokenInput>,
) -> AppResult<HttpResponse> {
    let user = accounts.verify_email(input.into_inner()).await?;
    Ok(ok("Email verified successfully", json!({ "user": user })))
}

async fn forgot_password(
    accounts: web::Data<AccountService>,
    input: web::Json<ForgotPasswordInput>,
) -> AppResult<HttpResponse> {
    let message = "If an account with that email exists, a password reset link has been sent";
    let body = match accounts.forgot_password(input.into_inner()).await? {
        Some(token) => json!({ "success": true, "message": message, "data": { "resetToken": token } }),
        None => json!({ "success": true, "message": message }),
    };
    Ok(HttpResponse::Ok().json(body))
}

async fn reset_password(
    accounts: web::Data<AccountService>,
    input: web::Json<ResetPasswordInput>,
) -> AppResult<HttpResponse> {
    accounts.reset_password(input.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Password has been reset successfully",
    })))
}

async fn logout(user: AuthUser) -> HttpResponse {
    log::info!("User {} logged out", user.id);
    HttpResponse::Ok().json(json!({ "success": true, "message": "Logged out successfully" }))
}

async fn me(accounts: web::Data<AccountService>, user: AuthUser) -> AppResult<HttpResponse> {
    let profile = accounts.me(&user).await?;
    Ok(ok("User retrieved", json!({ "user": profile })))
}

async fn stats(accounts: web::Data<AccountService>, user: AuthUser) -> AppResult<HttpResponse> {
    let stats = accounts.stats(&user).await?;
    Ok(ok("Stats retrieved", json!({ "stats": stats })))
}

async fn update_profile(
    accounts: web::Data<AccountService>,
    user: AuthUser,
    input: web::Json<UpdateProfileInput>,
) -> AppResult<HttpResponse> {
    let profile = accounts.update_profile(&user, input.into_inner()).await?;
    Ok(ok("Profile updated successfully", json!({ "user": profile })))
}

async fn change_password(
    accounts: web::Data<AccountService>,
    user: AuthUser,
    input: web::Json<ChangePasswordInput>,
) -> AppResult<HttpResponse> {
    accounts.change_password(&user, input.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Password changed successfully",
    })))
}

pub fn configure(limiters: &Limiters) -> impl FnOnce(&mut web::ServiceConfig) {
    let limiters = limiters.clone();
    move |cfg| {
        cfg.service(
            web::scope("/auth")
                .service(
                    web::resource("/register")
                        .wrap(RateLimit::new(limiters.register.clone()))
                        .route(web::post().to(register)),
                )
                .service(
                    web::resource("/login")
                        .wrap(RateLimit::new(limiters.login.clone()))
                        .route(web::post().to(login)),
                )
                .service(
                    web::resource("/verify-email")
                        .wrap(RateLimit::new(limiters.strict.clone()))
                        .route(web::post().to(verify_email)),
                )
                .service(
                    web::resource("/forgot-password")
                        .wrap(RateLimit::new(limiters.strict.clone()))
                        .route(web::post().to(forgot_password)),
                )
                .service(
                    web::resource("/reset-password")
                        .wrap(RateLimit::new(limiters.strict.clone()))
                        .route(web::post().to(reset_password)),
                )
                .service(
                    web::resource("/change-password")
                        .wrap(RateLimit::new(limiters.strict.clone()))
                        .wrap(AuthMiddleware)
                        .route(web::put().to(change_password)),
                )
                .service(
                    web::resource("/logout")
                        .wrap(AuthMiddleware)
                        .route(web::post().to(logout)),
                )
                .service(web::resource("/me").wrap(AuthMiddleware).route(web::get().to(me)))
                .service(
                    web::resource("/stats")
                        .wrap(AuthMiddleware)
                        .route(web::get().to(stats)),
                )
                .service(
                    web::resource("/profile")
                        .wrap(AuthMiddleware)
                        .route(web::put().to(update_profile)),
                ),
        );
    }
}
