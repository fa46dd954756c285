//! Persistence ports. Services talk to these traits; `mongo` provides the
//! MongoDB adapters used in production.

pub mod mongo;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{DateTime, Document};
use thiserror::Error;

use crate::error::AppError;
use crate::models::user::{Security, UpdateProfileInput, Verification};
use crate::models::{Product, User};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate value for {0}")]
    Duplicate(String),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("failed to encode document: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("failed to decode document: {0}")]
    Decode(#[from] bson::de::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(field) => AppError::Duplicate(field),
            other => AppError::internal(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `StoreError::Duplicate("email")` when the address is taken.
    async fn insert(&self, user: &User) -> StoreResult<()>;

    async fn find_by_id(&self, id: &ObjectId) -> StoreResult<Option<User>>;

    /// `email` must already be normalized.
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    async fn update_security(&self, id: &ObjectId, security: &Security) -> StoreResult<()>;

    /// Counts one wrong password as a single atomic write, applying the
    /// `auth::lockout` transitions against the stored state. Returns the
    /// resulting state, or `None` when the user no longer exists.
    async fn register_failed_login(&self, id: &ObjectId, now: DateTime) -> StoreResult<Option<Security>>;

    /// Clears failed attempts and stamps `stats.lastActive`.
    async fn record_login(&self, id: &ObjectId, at: DateTime) -> StoreResult<()>;

    async fn set_verification(&self, id: &ObjectId, verification: &Verification) -> StoreResult<()>;

    async fn set_password(&self, id: &ObjectId, password_hash: &str, at: DateTime) -> StoreResult<()>;

    async fn update_profile(
        &self,
        id: &ObjectId,
        changes: &UpdateProfileInput,
        at: DateTime,
    ) -> StoreResult<Option<User>>;

    /// Atomic increment of `stats.productsListed`; never drops below zero.
    async fn adjust_products_listed(&self, id: &ObjectId, delta: i64) -> StoreResult<()>;

    async fn count(&self) -> StoreResult<u64>;
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Fails with `StoreError::Duplicate("inventory.sku")` on a SKU clash.
    async fn insert(&self, product: &Product) -> StoreResult<()>;

    async fn find_by_id(&self, id: &ObjectId) -> StoreResult<Option<Product>>;

    /// Whole-document overwrite; returns false when the product no longer exists.
    async fn replace(&self, product: &Product) -> StoreResult<bool>;

    async fn set_quantity(&self, id: &ObjectId, quantity: i64, at: DateTime) -> StoreResult<bool>;

    async fn delete(&self, id: &ObjectId) -> StoreResult<bool>;

    async fn aggregate(&self, pipeline: Vec<Document>) -> StoreResult<Vec<Document>>;

    /// Runs a pipeline ending in `$count: "total"`.
    async fn count(&self, pipeline: Vec<Document>) -> StoreResult<u64>;
}
