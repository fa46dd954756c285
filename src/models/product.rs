use bson::oid::ObjectId;
use bson::{Bson, DateTime, Document};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Electronics,
    Clothing,
    HomeGarden,
    Sports,
    Books,
    Toys,
    Automotive,
    HealthBeauty,
    Food,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    New,
    LikeNew,
    #[default]
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    #[default]
    Active,
    Inactive,
    Sold,
    Reserved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StockStatus {
    OutOfStock,
    LowStock,
    InStock,
}

impl StockStatus {
    pub const OUT_OF_STOCK: &'static str = "out-of-stock";
    pub const LOW_STOCK: &'static str = "low-stock";
    pub const IN_STOCK: &'static str = "in-stock";

    /// Exactly one state holds for any quantity and threshold.
    pub fn from_inventory(quantity: i64, low_stock_threshold: i64) -> Self {
        if quantity <= 0 {
            StockStatus::OutOfStock
        } else if quantity <= low_stock_threshold {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }
}

/// Whole-number discount off `original_price`; 0 when there is no markdown.
pub fn discount_percentage(price: f64, original_price: Option<f64>) -> i64 {
    match original_price {
        Some(original) if original > 0.0 && price < original => {
            (100.0 * (original - price) / original).round() as i64
        }
        _ => 0,
    }
}

pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    pub quantity: i64,
    pub sku: String,
    pub low_stock_threshold: i64,
}

/// GeoJSON point, coordinates in `[lng, lat]` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<f64>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        GeoPoint {
            kind: "Point".to_string(),
            coordinates: vec![lng, lat],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub geo: GeoPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImage {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratings {
    pub average: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default)]
    pub condition: Condition,
    pub inventory: Inventory,
    pub location: Location,
    #[serde(default)]
    pub images: Vec<ProductImage>,
    #[serde(default)]
    pub ratings: Ratings,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: ProductStatus,
    pub created_by: ObjectId,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Product {
    pub fn is_owned_by(&self, user_id: &ObjectId) -> bool {
        &self.created_by == user_id
    }
}

/// Images arrive either as bare URLs or as `{url, alt}` objects.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImageInput {
    Url(String),
    Detailed { url: String, alt: Option<String> },
}

/// The first image is the primary one; any primary flag on the rest is cleared.
pub fn build_images(inputs: Vec<ImageInput>) -> Vec<ProductImage> {
    inputs
        .into_iter()
        .filter_map(|input| {
            let (url, alt) = match input {
                ImageInput::Url(url) => (url, None),
                ImageInput::Detailed { url, alt } => (url, alt),
            };
            let url = url.trim().to_string();
            (!url.is_empty()).then_some((url, alt))
        })
        .enumerate()
        .map(|(i, (url, alt))| ProductImage {
            url,
            alt,
            is_primary: i == 0,
        })
        .collect()
}

pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LocationInput {
    #[validate(range(min = -90.0, max = 90.0, message = "latitude must be between -90 and 90"))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "longitude must be between -180 and 180"))]
    pub lng: f64,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
}

impl From<LocationInput> for Location {
    fn from(input: LocationInput) -> Self {
        Location {
            geo: GeoPoint::new(input.lat, input.lng),
            lat: input.lat,
            lng: input.lng,
            address: input.address,
            city: input.city,
            state: input.state,
            zip_code: input.zip_code,
            country: input.country,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct InventoryInput {
    #[validate(range(min = 0, message = "quantity cannot be negative"))]
    pub quantity: Option<i64>,
    #[validate(length(min = 1, max = 64))]
    pub sku: Option<String>,
    #[validate(range(min = 0))]
    pub low_stock_threshold: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = 0.0, message = "price cannot be negative"))]
    pub price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub original_price: Option<f64>,
    pub category: Option<Category>,
    pub subcategory: Option<String>,
    pub brand: Option<String>,
    pub condition: Option<Condition>,
    #[validate(nested)]
    pub inventory: Option<InventoryInput>,
    #[validate(nested)]
    pub location: Option<LocationInput>,
    pub images: Option<Vec<ImageInput>>,
    pub tags: Option<Vec<String>>,
    pub status: Option<ProductStatus>,
}

impl CreateProductInput {
    /// Names of required fields absent from the payload.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
            missing.push("name");
        }
        if self.price.is_none() {
            missing.push("price");
        }
        if self.category.is_none() {
            missing.push("category");
        }
        if self.location.is_none() {
            missing.push("location");
        }
        missing
    }
}

/// Mutable product fields. Ownership and creation time are not representable here,
/// so payload keys such as `createdBy` or `createdAt` are dropped on deserialization.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[validate(range(min = 0.0, message = "price cannot be negative"))]
    pub price: Option<f64>,
    #[validate(range(min = 0.0))]
    pub original_price: Option<f64>,
    pub category: Option<Category>,
    pub subcategory: Option<String>,
    pub brand: Option<String>,
    pub condition: Option<Condition>,
    #[validate(nested)]
    pub inventory: Option<InventoryInput>,
    #[validate(nested)]
    pub location: Option<LocationInput>,
    pub images: Option<Vec<ImageInput>>,
    pub tags: Option<Vec<String>>,
    pub status: Option<ProductStatus>,
}

impl UpdateProductInput {
    pub fn apply_to(self, product: &mut Product, now: DateTime) {
        if let Some(name) = self.name {
            product.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            product.description = description;
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(original_price) = self.original_price {
            product.original_price = Some(original_price);
        }
        if let Some(category) = self.category {
            product.category = category;
        }
        if self.subcategory.is_some() {
            product.subcategory = self.subcategory;
        }
        if self.brand.is_some() {
            product.brand = self.brand;
        }
        if let Some(condition) = self.condition {
            product.condition = condition;
        }
        if let Some(inventory) = self.inventory {
            if let Some(quantity) = inventory.quantity {
                product.inventory.quantity = quantity;
            }
            if let Some(sku) = inventory.sku {
                product.inventory.sku = sku;
            }
            if let Some(threshold) = inventory.low_stock_threshold {
                product.inventory.low_stock_threshold = threshold;
            }
        }
        if let Some(location) = self.location {
            product.location = location.into();
        }
        if let Some(images) = self.images {
            product.images = build_images(images);
        }
        if let Some(tags) = self.tags {
            product.tags = normalize_tags(tags);
        }
        if let Some(status) = self.status {
            product.status = status;
        }
        product.updated_at = now;
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InventoryUpdateInput {
    #[validate(range(min = 0, message = "quantity cannot be negative"))]
    pub quantity: i64,
}

/// Public seller fields joined onto a product.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Seller {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SellerResponse {
    pub id: String,
    pub name: String,
    pub email: String,
}

impl From<Seller> for SellerResponse {
    fn from(seller: Seller) -> Self {
        SellerResponse {
            id: seller.id.to_hex(),
            name: seller.name,
            email: seller.email,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
    pub discount_percentage: i64,
    pub category: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub condition: Condition,
    pub inventory: Inventory,
    pub stock_status: StockStatus,
    pub location: Location,
    pub images: Vec<ProductImage>,
    pub ratings: Ratings,
    pub tags: Vec<String>,
    pub status: ProductStatus,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller: Option<SellerResponse>,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
}

impl ProductResponse {
    pub fn new(product: Product, seller: Option<Seller>) -> Self {
        let discount = discount_percentage(product.price, product.original_price);
        let stock = StockStatus::from_inventory(
            product.inventory.quantity,
            product.inventory.low_stock_threshold,
        );
        Self::with_derived(product, seller, discount, stock)
    }

    /// Builds a response from an aggregation row, preferring the fields the pipeline derived.
    pub fn from_document(doc: Document) -> Result<Self, bson::de::Error> {
        let discount = doc.get("discountPercentage").and_then(bson_as_i64);
        let stock = doc
            .get("stockStatus")
            .cloned()
            .and_then(|b| bson::from_bson::<StockStatus>(b).ok());
        let seller = match doc.get("seller") {
            Some(Bson::Document(seller)) => Some(bson::from_document::<Seller>(seller.clone())?),
            _ => None,
        };
        let product: Product = bson::from_document(doc)?;

        let discount =
            discount.unwrap_or_else(|| discount_percentage(product.price, product.original_price));
        let stock = stock.unwrap_or_else(|| {
            StockStatus::from_inventory(
                product.inventory.quantity,
                product.inventory.low_stock_threshold,
            )
        });
        Ok(Self::with_derived(product, seller, discount, stock))
    }

    fn with_derived(
        product: Product,
        seller: Option<Seller>,
        discount_percentage: i64,
        stock_status: StockStatus,
    ) -> Self {
        ProductResponse {
            id: product.id.to_hex(),
            name: product.name,
            description: product.description,
            price: product.price,
            original_price: product.original_price,
            discount_percentage,
            category: product.category,
            subcategory: product.subcategory,
            brand: product.brand,
            condition: product.condition,
            inventory: product.inventory,
            stock_status,
            location: product.location,
            images: product.images,
            ratings: product.ratings,
            tags: product.tags,
            status: product.status,
            created_by: product.created_by.to_hex(),
            seller: seller.map(SellerResponse::from),
            created_at: product.created_at.to_chrono(),
            updated_at: product.updated_at.to_chrono(),
        }
    }
}

fn bson_as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        Bson::Double(v) => Some(v.round() as i64),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bson::doc;

    pub(crate) fn sample_product(owner: ObjectId) -> Product {
        let now = DateTime::now();
        Product {
            id: ObjectId::new(),
            name: "Road bike".to_string(),
            description: "Aluminium frame, 54cm".to_string(),
            price: 350.0,
            original_price: Some(500.0),
            category: Category::Sports,
            subcategory: Some("bicycles".to_string()),
            brand: Some("Trek".to_string()),
            condition: Condition::LikeNew,
            inventory: Inventory {
                quantity: 3,
                sku: "SKU-1-ABC".to_string(),
                low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
            },
            location: LocationInput {
                lat: 28.06,
                lng: -82.41,
                address: None,
                city: Some("Tampa".to_string()),
                state: Some("FL".to_string()),
                zip_code: None,
                country: None,
            }
            .into(),
            images: Vec::new(),
            ratings: Ratings::default(),
            tags: vec!["bike".to_string()],
            status: ProductStatus::Active,
            created_by: owner,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn discount_is_zero_without_markdown() {
        assert_eq!(discount_percentage(10.0, None), 0);
        assert_eq!(discount_percentage(10.0, Some(10.0)), 0);
        assert_eq!(discount_percentage(12.0, Some(10.0)), 0);
        assert_eq!(discount_percentage(10.0, Some(0.0)), 0);
    }

    #[test]
    fn discount_rounds_to_whole_percent() {
        assert_eq!(discount_percentage(75.0, Some(100.0)), 25);
        assert_eq!(discount_percentage(2.0, Some(3.0)), 33);
        assert_eq!(discount_percentage(1.0, Some(3.0)), 67);
        assert_eq!(discount_percentage(0.0, Some(40.0)), 100);
    }

    #[test]
    fn stock_status_covers_every_quantity_once() {
        for threshold in 0..4 {
            for quantity in 0..8 {
                let status = StockStatus::from_inventory(quantity, threshold);
                let expected = if quantity == 0 {
                    StockStatus::OutOfStock
                } else if quantity <= threshold {
                    StockStatus::LowStock
                } else {
                    StockStatus::InStock
                };
                assert_eq!(status, expected, "q={quantity} t={threshold}");
            }
        }
    }

    #[test]
    fn first_image_is_primary() {
        let images = build_images(vec![
            ImageInput::Url(" ".to_string()),
            ImageInput::Url("a.jpg".to_string()),
            ImageInput::Detailed {
                url: "b.jpg".to_string(),
                alt: Some("side".to_string()),
            },
        ]);
        assert_eq!(images.len(), 2);
        assert!(images[0].is_primary);
        assert_eq!(images[0].url, "a.jpg");
        assert!(!images[1].is_primary);
    }

    #[test]
    fn tags_are_trimmed_lowercased_and_deduplicated() {
        let tags = normalize_tags(vec![
            "Bike ".to_string(),
            "bike".to_string(),
            "".to_string(),
            "Road".to_string(),
        ]);
        assert_eq!(tags, vec!["bike", "road"]);
    }

    #[test]
    fn missing_required_fields_are_listed() {
        let input = CreateProductInput {
            name: Some("  ".to_string()),
            ..Default::default()
        };
        assert_eq!(
            input.missing_fields(),
            vec!["name", "price", "category", "location"]
        );
    }

    #[test]
    fn update_payload_cannot_change_owner_or_creation_time() {
        let owner = ObjectId::new();
        let mut product = sample_product(owner);
        let created_at = product.created_at;

        let payload = serde_json::json!({
            "name": "Gravel bike",
            "createdBy": ObjectId::new().to_hex(),
            "createdAt": "2001-01-01T00:00:00Z",
            "location": {"lat": 27.95, "lng": -82.46}
        });
        let update: UpdateProductInput = serde_json::from_value(payload).unwrap();
        let later = DateTime::from_millis(created_at.timestamp_millis() + 1_000);
        update.apply_to(&mut product, later);

        assert_eq!(product.name, "Gravel bike");
        assert_eq!(product.created_by, owner);
        assert_eq!(product.created_at, created_at);
        assert_eq!(product.updated_at, later);
        assert_eq!(product.location.geo.coordinates, vec![-82.46, 27.95]);
    }

    #[test]
    fn response_prefers_pipeline_derived_fields() {
        let product = sample_product(ObjectId::new());
        let seller_id = ObjectId::new();
        let mut doc = bson::to_document(&product).unwrap();
        doc.insert("discountPercentage", 31_i32);
        doc.insert("stockStatus", "low-stock");
        doc.insert(
            "seller",
            doc! {"_id": seller_id, "name": "Ana", "email": "ana@x.com"},
        );

        let response = ProductResponse::from_document(doc).unwrap();
        assert_eq!(response.discount_percentage, 31);
        assert_eq!(response.stock_status, StockStatus::LowStock);
        assert_eq!(response.seller.unwrap().id, seller_id.to_hex());
    }

    #[test]
    fn response_computes_derived_fields_without_pipeline() {
        let product = sample_product(ObjectId::new());
        let response = ProductResponse::new(product, None);
        assert_eq!(response.discount_percentage, 30);
        assert_eq!(response.stock_status, StockStatus::LowStock);
        assert!(response.seller.is_none());
    }
}
