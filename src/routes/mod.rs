mod auth;
mod products;

use actix_web::{error, web, HttpResponse};
use serde::Serialize;
use serde_json::json;

use crate::error::AppError;
use crate::middleware::{Limiters, RateLimit};

pub(crate) fn ok<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Ok().json(json!({ "success": true, "message": message, "data": data }))
}

pub(crate) fn created<T: Serialize>(message: &str, data: T) -> HttpResponse {
    HttpResponse::Created().json(json!({ "success": true, "message": message, "data": data }))
}

/// Malformed or mistyped JSON bodies answer like any other validation failure.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        log::debug!("Rejected request body: {}", err);
        error::Error::from(AppError::validation(format!("Invalid request body: {err}")))
    })
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "status": "ok",
        "timestamp": chrono::Utc::now(),
    }))
}

pub fn configure(limiters: Limiters) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(json_config())
            .route("/health", web::get().to(health))
            .service(
                web::scope("/api")
                    .wrap(RateLimit::new(limiters.api.clone()))
                    .configure(auth::configure(&limiters))
                    .configure(products::configure),
            );
    }
}
