use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Database, IndexModel};

use crate::config::Config;
use crate::models::{Product, User};

pub const USERS_COLLECTION: &str = "users";
pub const PRODUCTS_COLLECTION: &str = "products";

pub async fn connect(config: &Config) -> mongodb::error::Result<Database> {
    let mut client_options = ClientOptions::parse(&config.database_url).await?;
    client_options.app_name = Some("bull-mart".to_string());

    let client = Client::with_options(client_options)?;
    Ok(client.database(&config.database_name))
}

fn index(keys: mongodb::bson::Document, options: Option<IndexOptions>) -> IndexModel {
    IndexModel::builder().keys(keys).options(options).build()
}

/// Creates the indexes queries depend on. Safe to run on every start.
pub async fn ensure_indexes(db: &Database) -> mongodb::error::Result<()> {
    let users = db.collection::<User>(USERS_COLLECTION);
    users
        .create_index(
            index(
                doc! { "email": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            None,
        )
        .await?;

    let products = db.collection::<Product>(PRODUCTS_COLLECTION);
    let models = vec![
        index(
            doc! { "inventory.sku": 1 },
            Some(IndexOptions::builder().unique(true).build()),
        ),
        index(doc! { "location.geo": "2dsphere" }, None),
        index(
            doc! { "name": "text", "description": "text", "brand": "text", "tags": "text" },
            Some(
                IndexOptions::builder()
                    .name("product_text".to_string())
                    .weights(doc! { "name": 10, "brand": 5, "tags": 3, "description": 1 })
                    .build(),
            ),
        ),
        index(doc! { "category": 1, "status": 1 }, None),
        index(doc! { "createdBy": 1 }, None),
        index(doc! { "price": 1 }, None),
        index(doc! { "createdAt": -1 }, None),
    ];
    products.create_indexes(models, None).await?;

    log::info!("Database indexes ensured");
    Ok(())
}
