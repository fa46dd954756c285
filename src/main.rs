use std::sync::Arc;
use std::time::Instant;

use actix_web::middleware::Logger;
use actix_web::{rt, web, App, HttpServer};

mod auth;
mod config;
mod db;
mod error;
mod middleware;
mod models;
mod routes;
mod search;
mod services;
mod store;

use crate::auth::TokenKeys;
use crate::config::Config;
use crate::middleware::{Limiters, MemoryRateLimitStore};
use crate::services::{AccountService, ProductService};
use crate::store::mongo::{MongoProductStore, MongoUserStore};
use crate::store::{ProductStore, UserStore};

fn startup_error(err: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        startup_error(e)
    })?;

    let db = db::connect(&config).await.map_err(startup_error)?;
    db::ensure_indexes(&db).await.map_err(|e| {
        log::error!("Failed to create indexes: {}", e);
        startup_error(e)
    })?;
    log::info!("Connected to database {}", config.database_name);

    let users: Arc<dyn UserStore> = Arc::new(MongoUserStore::new(&db));
    let products: Arc<dyn ProductStore> = Arc::new(MongoProductStore::new(&db));
    let keys = TokenKeys::new(&config.jwt_secret);

    let accounts = web::Data::new(AccountService::new(
        users.clone(),
        keys.clone(),
        config.expose_dev_tokens,
    ));
    let catalog = web::Data::new(ProductService::new(
        products,
        users,
        config.require_email_verification,
    ));
    let keys = web::Data::new(keys);

    let counters = Arc::new(MemoryRateLimitStore::default());
    let limiters = Limiters::new(&config.rate_limits, counters.clone());
    let window = config.rate_limits.longest_window();
    rt::spawn(async move {
        let mut tick = rt::time::interval(window);
        loop {
            tick.tick().await;
            counters.purge(window, Instant::now());
            log::debug!("Rate limit counters after purge: {}", counters.len());
        }
    });

    log::info!("Starting server on {}:{}", config.host, config.port);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(keys.clone())
            .app_data(accounts.clone())
            .app_data(catalog.clone())
            .configure(routes::configure(limiters.clone()))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
