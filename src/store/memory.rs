//! In-process stores for unit tests. Aggregation pipelines are not
//! interpreted: `aggregate` yields every stored product and `count` their number.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{DateTime, Document};
use dashmap::DashMap;

use super::{ProductStore, StoreError, StoreResult, UserStore};
use crate::auth::lockout;
use crate::models::user::{Security, UpdateProfileInput, Verification};
use crate::models::{Product, User};

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<ObjectId, User>,
    yield_on_read: AtomicBool,
}

impl MemoryUserStore {
    /// Makes `find_by_email` hand control back to the runtime after reading,
    /// so concurrent callers interleave between their read and their write.
    pub fn yield_on_read(&self) {
        self.yield_on_read.store(true, Ordering::SeqCst);
    }

    pub fn get(&self, id: &ObjectId) -> Option<User> {
        self.users.get(id).map(|u| u.clone())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, user: &User) -> StoreResult<()> {
        if self.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("email".to_string()));
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ObjectId) -> StoreResult<Option<User>> {
        Ok(self.get(id))
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let user = self
            .users
            .iter()
            .find(|u| u.email == email)
            .map(|u| u.clone());
        if self.yield_on_read.load(Ordering::SeqCst) {
            actix_web::rt::task::yield_now().await;
        }
        Ok(user)
    }

    async fn update_security(&self, id: &ObjectId, security: &Security) -> StoreResult<()> {
        if let Some(mut user) = self.users.get_mut(id) {
            user.security = *security;
        }
        Ok(())
    }

    async fn register_failed_login(&self, id: &ObjectId, now: DateTime) -> StoreResult<Option<Security>> {
        Ok(self.users.get_mut(id).map(|mut user| {
            user.security = lockout::register_failure(&user.security, now);
            user.security
        }))
    }

    async fn record_login(&self, id: &ObjectId, at: DateTime) -> StoreResult<()> {
        if let Some(mut user) = self.users.get_mut(id) {
            user.security = Security::default();
            user.stats.last_active = at;
        }
        Ok(())
    }

    async fn set_verification(&self, id: &ObjectId, verification: &Verification) -> StoreResult<()> {
        if let Some(mut user) = self.users.get_mut(id) {
            user.verification = verification.clone();
        }
        Ok(())
    }

    async fn set_password(&self, id: &ObjectId, password_hash: &str, at: DateTime) -> StoreResult<()> {
        if let Some(mut user) = self.users.get_mut(id) {
            user.password = password_hash.to_string();
            user.updated_at = at;
        }
        Ok(())
    }

    async fn update_profile(
        &self,
        id: &ObjectId,
        changes: &UpdateProfileInput,
        at: DateTime,
    ) -> StoreResult<Option<User>> {
        let Some(mut user) = self.users.get_mut(id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            user.name = name.trim().to_string();
        }
        if let Some(profile) = &changes.profile {
            user.profile = profile.clone();
        }
        if let Some(location) = &changes.location {
            user.location = Some(location.clone());
        }
        if let Some(preferences) = &changes.preferences {
            user.preferences = preferences.clone();
        }
        user.updated_at = at;
        Ok(Some(user.clone()))
    }

    async fn adjust_products_listed(&self, id: &ObjectId, delta: i64) -> StoreResult<()> {
        if let Some(mut user) = self.users.get_mut(id) {
            if user.stats.products_listed + delta >= 0 {
                user.stats.products_listed += delta;
            }
        }
        Ok(())
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.users.len() as u64)
    }
}

#[derive(Default)]
pub struct MemoryProductStore {
    products: DashMap<ObjectId, Product>,
    forced_sku_conflicts: AtomicUsize,
}

impl MemoryProductStore {
    /// Makes the next `n` inserts fail as SKU clashes.
    pub fn force_sku_conflicts(&self, n: usize) {
        self.forced_sku_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn get(&self, id: &ObjectId) -> Option<Product> {
        self.products.get(id).map(|p| p.clone())
    }

    fn sku_taken(&self, sku: &str, except: Option<&ObjectId>) -> bool {
        self.products
            .iter()
            .any(|p| p.inventory.sku == sku && Some(&p.id) != except)
    }
}

#[async_trait]
impl ProductStore for MemoryProductStore {
    async fn insert(&self, product: &Product) -> StoreResult<()> {
        let forced = self
            .forced_sku_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if forced || self.sku_taken(&product.inventory.sku, None) {
            return Err(StoreError::Duplicate("inventory.sku".to_string()));
        }
        self.products.insert(product.id, product.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &ObjectId) -> StoreResult<Option<Product>> {
        Ok(self.get(id))
    }

    async fn replace(&self, product: &Product) -> StoreResult<bool> {
        if self.sku_taken(&product.inventory.sku, Some(&product.id)) {
            return Err(StoreError::Duplicate("inventory.sku".to_string()));
        }
        match self.products.get_mut(&product.id) {
            Some(mut existing) => {
                *existing = product.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_quantity(&self, id: &ObjectId, quantity: i64, at: DateTime) -> StoreResult<bool> {
        match self.products.get_mut(id) {
            Some(mut product) => {
                product.inventory.quantity = quantity;
                product.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        Ok(self.products.remove(id).is_some())
    }

    async fn aggregate(&self, _pipeline: Vec<Document>) -> StoreResult<Vec<Document>> {
        self.products
            .iter()
            .map(|p| bson::to_document(p.value()).map_err(StoreError::from))
            .collect()
    }

    async fn count(&self, _pipeline: Vec<Document>) -> StoreResult<u64> {
        Ok(self.products.len() as u64)
    }
}
