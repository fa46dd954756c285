use std::collections::HashMap;

use bson::{doc, Document};
use serde::de::value::{Error as DeValueError, StrDeserializer};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::models::{Category, Condition, ProductStatus};

/// Equatorial radius used to turn kilometres into `$centerSphere` radians.
pub const EARTH_RADIUS_METERS: f64 = 6_378_137.0;
pub const DEFAULT_RADIUS_KM: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoRadius {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: f64,
}

impl GeoRadius {
    pub fn radians(&self) -> f64 {
        self.radius_km * 1000.0 / EARTH_RADIUS_METERS
    }

    /// Reads `lat`, `lng` and `radius` from a query map. Latitude and longitude
    /// come as a pair; the radius falls back to the default search radius.
    pub fn from_query(query: &HashMap<String, String>) -> AppResult<Option<Self>> {
        let lat = parse_number(query, "lat")?;
        let lng = parse_number(query, "lng")?;
        let radius = parse_number(query, "radius")?;

        let (lat, lng) = match (lat, lng) {
            (None, None) => return Ok(None),
            (Some(lat), Some(lng)) => (lat, lng),
            (Some(_), None) => return Err(AppError::invalid_field("lng", "lng is required with lat")),
            (None, Some(_)) => return Err(AppError::invalid_field("lat", "lat is required with lng")),
        };

        if !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::invalid_field("lat", "must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(AppError::invalid_field("lng", "must be between -180 and 180"));
        }
        let radius_km = radius.unwrap_or(DEFAULT_RADIUS_KM);
        if radius_km <= 0.0 {
            return Err(AppError::invalid_field("radius", "must be greater than 0"));
        }

        Ok(Some(GeoRadius { lat, lng, radius_km }))
    }

    pub fn to_filter(&self) -> Document {
        doc! {
            "$geoWithin": {
                "$centerSphere": [[self.lng, self.lat], self.radians()]
            }
        }
    }
}

/// Search criteria; every field is optional and absent fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ProductStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_stock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoRadius>,
}

impl SearchParams {
    pub fn from_query(query: &HashMap<String, String>) -> AppResult<Self> {
        let params = SearchParams {
            text: non_empty(query, "text"),
            category: parse_enum(query, "category")?,
            subcategory: non_empty(query, "subcategory"),
            brand: non_empty(query, "brand"),
            condition: parse_enum(query, "condition")?,
            status: parse_enum(query, "status")?,
            min_price: parse_number(query, "minPrice")?,
            max_price: parse_number(query, "maxPrice")?,
            min_rating: parse_number(query, "minRating")?,
            in_stock: parse_bool(query, "inStock")?,
            geo: GeoRadius::from_query(query)?,
        };

        if let (Some(min), Some(max)) = (params.min_price, params.max_price) {
            if min > max {
                return Err(AppError::invalid_field(
                    "minPrice",
                    "minPrice cannot be greater than maxPrice",
                ));
            }
        }
        if let Some(rating) = params.min_rating {
            if !(0.0..=5.0).contains(&rating) {
                return Err(AppError::invalid_field("minRating", "must be between 0 and 5"));
            }
        }

        Ok(params)
    }
}

/// AND of every supplied criterion.
pub fn build_filter(params: &SearchParams) -> Document {
    let mut filter = Document::new();

    if let Some(text) = &params.text {
        filter.insert("$text", doc! { "$search": text });
    }
    if let Some(category) = params.category {
        filter.insert("category", enum_bson(&category));
    }
    if let Some(subcategory) = &params.subcategory {
        filter.insert("subcategory", subcategory);
    }
    if let Some(brand) = &params.brand {
        filter.insert(
            "brand",
            doc! { "$regex": regex::escape(brand), "$options": "i" },
        );
    }
    if let Some(condition) = params.condition {
        filter.insert("condition", enum_bson(&condition));
    }
    if let Some(status) = params.status {
        filter.insert("status", enum_bson(&status));
    }

    let mut price = Document::new();
    if let Some(min) = params.min_price {
        price.insert("$gte", min);
    }
    if let Some(max) = params.max_price {
        price.insert("$lte", max);
    }
    if !price.is_empty() {
        filter.insert("price", price);
    }

    if let Some(rating) = params.min_rating {
        filter.insert("ratings.average", doc! { "$gte": rating });
    }
    if params.in_stock == Some(true) {
        filter.insert("inventory.quantity", doc! { "$gt": 0 });
    }
    if let Some(geo) = &params.geo {
        filter.insert("location.geo", geo.to_filter());
    }

    filter
}

fn enum_bson<T: Serialize>(value: &T) -> bson::Bson {
    bson::to_bson(value).unwrap_or(bson::Bson::Null)
}

pub(crate) fn non_empty(query: &HashMap<String, String>, key: &str) -> Option<String> {
    query
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Absent or blank is `None`; anything unparsable is a validation error, never zero.
pub(crate) fn parse_number(query: &HashMap<String, String>, key: &str) -> AppResult<Option<f64>> {
    match non_empty(query, key) {
        None => Ok(None),
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(AppError::invalid_field(key, format!("'{raw}' is not a valid number"))),
        },
    }
}

pub(crate) fn parse_positive_int(
    query: &HashMap<String, String>,
    key: &str,
) -> AppResult<Option<u64>> {
    match non_empty(query, key) {
        None => Ok(None),
        Some(raw) => match raw.parse::<i64>() {
            Ok(value) if value >= 1 => Ok(Some(value as u64)),
            Ok(_) => Err(AppError::invalid_field(key, "must be at least 1")),
            Err(_) => Err(AppError::invalid_field(key, format!("'{raw}' is not a valid integer"))),
        },
    }
}

pub(crate) fn parse_bool(query: &HashMap<String, String>, key: &str) -> AppResult<Option<bool>> {
    match non_empty(query, key).as_deref() {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(raw) => Err(AppError::invalid_field(key, format!("'{raw}' is not a valid boolean"))),
    }
}

pub(crate) fn parse_enum<T: DeserializeOwned>(
    query: &HashMap<String, String>,
    key: &str,
) -> AppResult<Option<T>> {
    match non_empty(query, key) {
        None => Ok(None),
        Some(raw) => T::deserialize(StrDeserializer::<DeValueError>::new(&raw))
            .map(Some)
            .map_err(|_| AppError::invalid_field(key, format!("'{raw}' is not a recognised value"))),
    }
}
