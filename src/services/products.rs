use std::collections::HashMap;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, DateTime, Document};
use rand::Rng;
use serde::Serialize;
use validator::Validate;

use crate::auth::AuthUser;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::product::{
    build_images, normalize_tags, Inventory, Ratings, Seller, DEFAULT_LOW_STOCK_THRESHOLD,
};
use crate::models::{
    CreateProductInput, InventoryUpdateInput, Product, ProductResponse, UpdateProductInput,
};
use crate::search::pipeline::{
    build_analytics_pipeline, build_category_pipeline, SortField, SortOrder, DEFAULT_LIST_LIMIT,
    DEFAULT_PAGE_LIMIT,
};
use crate::search::{
    build_count_pipeline, build_filter, build_search_pipeline, GeoRadius, Pagination,
    SearchOptions, SearchParams,
};
use crate::store::{ProductStore, StoreError, UserStore};

const SKU_ATTEMPTS: usize = 3;
const SKU_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `SKU-<unix millis>-<9 random uppercase alphanumerics>`.
pub fn generate_sku(now: DateTime) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| SKU_ALPHABET[rng.gen_range(0..SKU_ALPHABET.len())] as char)
        .collect();
    format!("SKU-{}-{}", now.timestamp_millis(), suffix)
}

/// A timestamp strictly after `previous`, so every mutation moves `updatedAt` forward.
fn next_timestamp(previous: DateTime) -> DateTime {
    let now = DateTime::now();
    if now > previous {
        now
    } else {
        DateTime::from_millis(previous.timestamp_millis() + 1)
    }
}

fn parse_id(id: &str) -> AppResult<ObjectId> {
    ObjectId::parse_str(id).map_err(|_| AppError::invalid_field("id", "not a valid product id"))
}

#[derive(Debug, Serialize)]
pub struct ProductList {
    pub products: Vec<ProductResponse>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub products: Vec<ProductResponse>,
    pub pagination: Pagination,
    pub filters: SearchParams,
}

pub struct ProductService {
    products: Arc<dyn ProductStore>,
    users: Arc<dyn UserStore>,
    require_email_verification: bool,
}

impl ProductService {
    pub fn new(
        products: Arc<dyn ProductStore>,
        users: Arc<dyn UserStore>,
        require_email_verification: bool,
    ) -> Self {
        ProductService {
            products,
            users,
            require_email_verification,
        }
    }

    async fn ensure_can_write(&self, actor: &AuthUser) -> AppResult<()> {
        if !self.require_email_verification {
            return Ok(());
        }
        let user = self
            .users
            .find_by_id(&actor.id)
            .await?
            .ok_or_else(|| AppError::Unauthenticated("Account no longer exists".to_string()))?;
        if user.verification.email_verified {
            Ok(())
        } else {
            Err(AppError::EmailNotVerified)
        }
    }

    /// Owners may change their own products; admins may change any.
    fn authorize(actor: &AuthUser, product: &Product) -> AppResult<()> {
        if product.is_owned_by(&actor.id) || actor.role.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(
                "You can only modify your own products".to_string(),
            ))
        }
    }

    async fn load(&self, id: &ObjectId) -> AppResult<Product> {
        self.products
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Product".to_string()))
    }

    pub async fn create(&self, actor: &AuthUser, input: CreateProductInput) -> AppResult<ProductResponse> {
        input.validate()?;
        let missing = input.missing_fields();
        let (Some(name), Some(price), Some(category), Some(location), true) = (
            input.name,
            input.price,
            input.category,
            input.location,
            missing.is_empty(),
        ) else {
            return Err(AppError::Validation {
                message: format!("Missing required fields: {}", missing.join(", ")),
                fields: missing
                    .iter()
                    .map(|f| FieldError::new(*f, "is required"))
                    .collect(),
            });
        };
        self.ensure_can_write(actor).await?;

        let now = DateTime::now();
        let inventory = input.inventory.unwrap_or_default();
        let explicit_sku = inventory
            .sku
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut product = Product {
            id: ObjectId::new(),
            name: name.trim().to_string(),
            description: input.description.unwrap_or_default(),
            price,
            original_price: input.original_price,
            category,
            subcategory: input.subcategory,
            brand: input.brand,
            condition: input.condition.unwrap_or_default(),
            inventory: Inventory {
                quantity: inventory.quantity.unwrap_or(1),
                sku: explicit_sku.clone().unwrap_or_else(|| generate_sku(now)),
                low_stock_threshold: inventory
                    .low_stock_threshold
                    .unwrap_or(DEFAULT_LOW_STOCK_THRESHOLD),
            },
            location: location.into(),
            images: build_images(input.images.unwrap_or_default()),
            ratings: Ratings::default(),
            tags: normalize_tags(input.tags.unwrap_or_default()),
            status: input.status.unwrap_or_default(),
            created_by: actor.id,
            created_at: now,
            updated_at: now,
        };

        let mut attempt = 1;
        loop {
            match self.products.insert(&product).await {
                Ok(()) => break,
                Err(StoreError::Duplicate(field))
                    if explicit_sku.is_none() && field == "inventory.sku" && attempt < SKU_ATTEMPTS =>
                {
                    log::warn!("Generated SKU {} collided, retrying", product.inventory.sku);
                    product.inventory.sku = generate_sku(DateTime::now());
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.users.adjust_products_listed(&actor.id, 1).await?;
        log::info!("Product {} created by {}", product.id, actor.id);
        Ok(ProductResponse::new(product, None))
    }

    pub async fn update(
        &self,
        actor: &AuthUser,
        id: &str,
        input: UpdateProductInput,
    ) -> AppResult<ProductResponse> {
        input.validate()?;
        let id = parse_id(id)?;
        let mut product = self.load(&id).await?;
        Self::authorize(actor, &product)?;
        self.ensure_can_write(actor).await?;

        let now = next_timestamp(product.updated_at);
        input.apply_to(&mut product, now);

        if !self.products.replace(&product).await? {
            return Err(AppError::NotFound("Product".to_string()));
        }
        log::info!("Product {} updated by {}", product.id, actor.id);
        Ok(ProductResponse::new(product, None))
    }

    pub async fn delete(&self, actor: &AuthUser, id: &str) -> AppResult<()> {
        let id = parse_id(id)?;
        let product = self.load(&id).await?;
        Self::authorize(actor, &product)?;

        if !self.products.delete(&id).await? {
            return Err(AppError::NotFound("Product".to_string()));
        }
        self.users
            .adjust_products_listed(&product.created_by, -1)
            .await?;
        log::info!("Product {} deleted by {}", id, actor.id);
        Ok(())
    }

    pub async fn update_inventory(
        &self,
        actor: &AuthUser,
        id: &str,
        input: InventoryUpdateInput,
    ) -> AppResult<ProductResponse> {
        input.validate()?;
        let id = parse_id(id)?;
        let mut product = self.load(&id).await?;
        Self::authorize(actor, &product)?;
        self.ensure_can_write(actor).await?;

        let now = next_timestamp(product.updated_at);
        if !self.products.set_quantity(&id, input.quantity, now).await? {
            return Err(AppError::NotFound("Product".to_string()));
        }
        product.inventory.quantity = input.quantity;
        product.updated_at = now;
        Ok(ProductResponse::new(product, None))
    }

    pub async fn get(&self, id: &str, populate: bool) -> AppResult<ProductResponse> {
        let id = parse_id(id)?;
        let product = self.load(&id).await?;

        let seller = if populate {
            self.users
                .find_by_id(&product.created_by)
                .await?
                .map(|u| Seller {
                    id: u.id,
                    name: u.name,
                    email: u.email,
                })
        } else {
            None
        };
        Ok(ProductResponse::new(product, seller))
    }

    /// Newest first, optionally within a radius. Seller details are joined only on request.
    pub async fn list(&self, query: &HashMap<String, String>) -> AppResult<ProductList> {
        let params = SearchParams {
            geo: GeoRadius::from_query(query)?,
            ..Default::default()
        };
        let options = SearchOptions {
            sort_by: SortField::CreatedAt,
            sort_order: SortOrder::Desc,
            page: 1,
            ..SearchOptions::from_query(query, DEFAULT_LIST_LIMIT)?
        };

        let pipeline = build_search_pipeline(build_filter(&params), &options);
        let products = self.run(pipeline).await?;
        Ok(ProductList {
            count: products.len(),
            products,
        })
    }

    pub async fn search(&self, query: &HashMap<String, String>) -> AppResult<SearchResult> {
        let params = SearchParams::from_query(query)?;
        let options = SearchOptions::from_query(query, DEFAULT_PAGE_LIMIT)?;
        let filter = build_filter(&params);

        let (products, total) = futures::try_join!(
            self.run(build_search_pipeline(filter.clone(), &options)),
            async {
                self.products
                    .count(build_count_pipeline(filter.clone()))
                    .await
                    .map_err(AppError::from)
            }
        )?;

        Ok(SearchResult {
            products,
            pagination: Pagination::new(options.page, options.limit, total),
            filters: params,
        })
    }

    pub async fn categories(&self) -> AppResult<Vec<serde_json::Value>> {
        let rows = self.products.aggregate(build_category_pipeline()).await?;
        Ok(rows.into_iter().map(to_json).collect())
    }

    pub async fn analytics(&self, actor: &AuthUser) -> AppResult<serde_json::Value> {
        actor.require_role(crate::models::Role::Admin)?;

        let facets = self
            .products
            .aggregate(build_analytics_pipeline())
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let users = self.users.count().await?;

        Ok(serde_json::json!({
            "products": to_json(facets),
            "users": { "total": users },
        }))
    }

    async fn run(&self, pipeline: Vec<Document>) -> AppResult<Vec<ProductResponse>> {
        self.products
            .aggregate(pipeline)
            .await?
            .into_iter()
            .map(|row| ProductResponse::from_document(row).map_err(AppError::internal))
            .collect()
    }
}

fn to_json(doc: Document) -> serde_json::Value {
    Bson::Document(doc).into_relaxed_extjson()
}
