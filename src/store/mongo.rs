use async_trait::async_trait;
use futures::stream::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Bson, DateTime, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Collection, Database};

use super::{ProductStore, StoreError, StoreResult, UserStore};
use crate::auth::lockout::{LOCK_DURATION_SECS, MAX_LOGIN_ATTEMPTS};
use crate::db::{PRODUCTS_COLLECTION, USERS_COLLECTION};
use crate::models::user::{Security, UpdateProfileInput, Verification};
use crate::models::{Product, User};

const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn map_write_error(err: mongodb::error::Error, field: &str) -> StoreError {
    if is_duplicate_key(&err) {
        StoreError::Duplicate(field.to_string())
    } else {
        StoreError::Database(err)
    }
}

/// Update pipeline mirroring `lockout::register_failure`. Every expression in
/// the single `$set` stage reads the pre-update document.
fn failed_login_update(now: DateTime) -> Vec<Document> {
    let lock_until = doc! { "$ifNull": ["$security.lockUntil", Bson::Null] };
    let expired = doc! {
        "$and": [
            { "$ne": [lock_until.clone(), Bson::Null] },
            { "$lte": ["$security.lockUntil", now] },
        ]
    };
    let attempts = doc! { "$add": [{ "$ifNull": ["$security.loginAttempts", 0] }, 1] };
    let locked_now = doc! { "$gt": ["$security.lockUntil", now] };
    let lock_end = DateTime::from_millis(now.timestamp_millis() + LOCK_DURATION_SECS * 1000);

    vec![doc! {
        "$set": {
            "security.loginAttempts": { "$cond": [expired.clone(), 1, attempts.clone()] },
            "security.lockUntil": {
                "$cond": [
                    expired,
                    Bson::Null,
                    {
                        "$cond": [
                            { "$and": [{ "$gte": [attempts, MAX_LOGIN_ATTEMPTS] }, { "$not": [locked_now] }] },
                            lock_end,
                            lock_until,
                        ]
                    },
                ]
            },
        }
    }]
}

pub struct MongoUserStore {
    collection: Collection<User>,
}

impl MongoUserStore {
    pub fn new(db: &Database) -> Self {
        MongoUserStore {
            collection: db.collection(USERS_COLLECTION),
        }
    }

    async fn set(&self, id: &ObjectId, fields: Document) -> StoreResult<()> {
        self.collection
            .update_one(doc! { "_id": *id }, doc! { "$set": fields }, None)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn insert(&self, user: &User) -> StoreResult<()> {
        self.collection
            .insert_one(user, None)
            .await
            .map_err(|e| map_write_error(e, "email"))?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ObjectId) -> StoreResult<Option<User>> {
        Ok(self.collection.find_one(doc! { "_id": *id }, None).await?)
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.collection.find_one(doc! { "email": email }, None).await?)
    }

    async fn update_security(&self, id: &ObjectId, security: &Security) -> StoreResult<()> {
        self.set(id, doc! { "security": bson::to_bson(security)? }).await
    }

    async fn register_failed_login(&self, id: &ObjectId, now: DateTime) -> StoreResult<Option<Security>> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let user = self
            .collection
            .find_one_and_update(doc! { "_id": *id }, failed_login_update(now), options)
            .await?;
        Ok(user.map(|u| u.security))
    }

    async fn record_login(&self, id: &ObjectId, at: DateTime) -> StoreResult<()> {
        self.set(
            id,
            doc! {
                "security.loginAttempts": 0,
                "security.lockUntil": Bson::Null,
                "stats.lastActive": at,
            },
        )
        .await
    }

    async fn set_verification(&self, id: &ObjectId, verification: &Verification) -> StoreResult<()> {
        self.set(id, doc! { "verification": bson::to_bson(verification)? })
            .await
    }

    async fn set_password(&self, id: &ObjectId, password_hash: &str, at: DateTime) -> StoreResult<()> {
        self.set(id, doc! { "password": password_hash, "updatedAt": at })
            .await
    }

    async fn update_profile(
        &self,
        id: &ObjectId,
        changes: &UpdateProfileInput,
        at: DateTime,
    ) -> StoreResult<Option<User>> {
        let mut fields = doc! { "updatedAt": at };
        if let Some(name) = &changes.name {
            fields.insert("name", name.trim());
        }
        if let Some(profile) = &changes.profile {
            fields.insert("profile", bson::to_bson(profile)?);
        }
        if let Some(location) = &changes.location {
            fields.insert("location", bson::to_bson(location)?);
        }
        if let Some(preferences) = &changes.preferences {
            fields.insert("preferences", bson::to_bson(preferences)?);
        }

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .collection
            .find_one_and_update(doc! { "_id": *id }, doc! { "$set": fields }, options)
            .await?)
    }

    async fn adjust_products_listed(&self, id: &ObjectId, delta: i64) -> StoreResult<()> {
        let mut filter = doc! { "_id": *id };
        if delta < 0 {
            filter.insert("stats.productsListed", doc! { "$gte": -delta });
        }
        self.collection
            .update_one(filter, doc! { "$inc": { "stats.productsListed": delta } }, None)
            .await?;
        Ok(())
    }

    async fn count(&self) -> StoreResult<u64> {
        Ok(self.collection.count_documents(None, None).await?)
    }
}

pub struct MongoProductStore {
    collection: Collection<Product>,
}

impl MongoProductStore {
    pub fn new(db: &Database) -> Self {
        MongoProductStore {
            collection: db.collection(PRODUCTS_COLLECTION),
        }
    }
}

#[async_trait]
impl ProductStore for MongoProductStore {
    async fn insert(&self, product: &Product) -> StoreResult<()> {
        self.collection
            .insert_one(product, None)
            .await
            .map_err(|e| map_write_error(e, "inventory.sku"))?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ObjectId) -> StoreResult<Option<Product>> {
        Ok(self.collection.find_one(doc! { "_id": *id }, None).await?)
    }

    async fn replace(&self, product: &Product) -> StoreResult<bool> {
        let result = self
            .collection
            .replace_one(doc! { "_id": product.id }, product, None)
            .await
            .map_err(|e| map_write_error(e, "inventory.sku"))?;
        Ok(result.matched_count == 1)
    }

    async fn set_quantity(&self, id: &ObjectId, quantity: i64, at: DateTime) -> StoreResult<bool> {
        let result = self
            .collection
            .update_one(
                doc! { "_id": *id },
                doc! { "$set": { "inventory.quantity": quantity, "updatedAt": at } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    async fn delete(&self, id: &ObjectId) -> StoreResult<bool> {
        let result = self.collection.delete_one(doc! { "_id": *id }, None).await?;
        Ok(result.deleted_count == 1)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> StoreResult<Vec<Document>> {
        let cursor = self.collection.aggregate(pipeline, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count(&self, pipeline: Vec<Document>) -> StoreResult<u64> {
        let rows = self.aggregate(pipeline).await?;
        Ok(rows.first().map_or(0, |row| match row.get("total") {
            Some(Bson::Int32(n)) => *n as u64,
            Some(Bson::Int64(n)) => *n as u64,
            _ => 0,
        }))
    }
}
