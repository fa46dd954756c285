use std::collections::HashMap;

use actix_web::{web, HttpResponse};
use serde_json::json;

use super::{created, ok};
use crate::auth::AuthUser;
use crate::error::AppResult;
use crate::models::{CreateProductInput, InventoryUpdateInput, UpdateProductInput};
use crate::search::filter::parse_bool;
use crate::services::ProductService;

type Query = web::Query<HashMap<String, String>>;

async fn list(products: web::Data<ProductService>, query: Query) -> AppResult<HttpResponse> {
    let list = products.list(&query).await?;
    Ok(ok("Products retrieved", list))
}

async fn search(products: web::Data<ProductService>, query: Query) -> AppResult<HttpResponse> {
    let result = products.search(&query).await?;
    Ok(ok("Search completed", result))
}

async fn categories(products: web::Data<ProductService>) -> AppResult<HttpResponse> {
    let categories = products.categories().await?;
    Ok(ok("Categories retrieved", json!({ "categories": categories })))
}

async fn analytics(products: web::Data<ProductService>, user: AuthUser) -> AppResult<HttpResponse> {
    let analytics = products.analytics(&user).await?;
    Ok(ok("Analytics retrieved", analytics))
}

async fn get(
    products: web::Data<ProductService>,
    id: web::Path<String>,
    query: Query,
) -> AppResult<HttpResponse> {
    let populate = parse_bool(&query, "populate")?.unwrap_or(true);
    let product = products.get(&id, populate).await?;
    Ok(ok("Product retrieved", json!({ "product": product })))
}

async fn create(
    products: web::Data<ProductService>,
    user: AuthUser,
    input: web::Json<CreateProductInput>,
) -> AppResult<HttpResponse> {
    let product = products.create(&user, input.into_inner()).await?;
    Ok(created("Product created successfully", json!({ "product": product })))
}

async fn update(
    products: web::Data<ProductService>,
    user: AuthUser,
    id: web::Path<String>,
    input: web::Json<UpdateProductInput>,
) -> AppResult<HttpResponse> {
    let product = products.update(&user, &id, input.into_inner()).await?;
    Ok(ok("Product updated successfully", json!({ "product": product })))
}

async fn update_inventory(
    products: web::Data<ProductService>,
    user: AuthUser,
    id: web::Path<String>,
    input: web::Json<InventoryUpdateInput>,
) -> AppResult<HttpResponse> {
    let product = products
        .update_inventory(&user, &id, input.into_inner())
        .await?;
    Ok(ok("Inventory updated successfully", json!({ "product": product })))
}

async fn delete(
    products: web::Data<ProductService>,
    user: AuthUser,
    id: web::Path<String>,
) -> AppResult<HttpResponse> {
    products.delete(&user, &id).await?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Product deleted successfully",
    })))
}

/// Writes authenticate through the `AuthUser` extractor since reads on the
/// same paths are public. Static paths are registered before `/{id}`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/products")
            .service(
                web::resource("")
                    .route(web::get().to(list))
                    .route(web::post().to(create)),
            )
            .route("/search", web::get().to(search))
            .route("/categories", web::get().to(categories))
            .route("/analytics", web::get().to(analytics))
            .service(
                web::resource("/{id}")
                    .route(web::get().to(get))
                    .route(web::put().to(update))
                    .route(web::delete().to(delete)),
            )
            .route("/{id}/inventory", web::put().to(update_inventory)),
    );
}
