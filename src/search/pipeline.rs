use std::collections::HashMap;

use bson::{doc, Document};
use serde::{Deserialize, Serialize};

use super::filter::{parse_bool, parse_enum, parse_positive_int};
use crate::db::USERS_COLLECTION;
use crate::error::{AppError, AppResult};
use crate::models::product::{StockStatus, DEFAULT_LOW_STOCK_THRESHOLD};

pub const DEFAULT_PAGE_LIMIT: u64 = 20;
pub const DEFAULT_LIST_LIMIT: u64 = 50;
pub const MAX_PAGE_LIMIT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Price,
    Name,
    Rating,
    DiscountPercentage,
    Relevance,
}

impl SortField {
    fn path(self) -> &'static str {
        match self {
            SortField::CreatedAt | SortField::Relevance => "createdAt",
            SortField::UpdatedAt => "updatedAt",
            SortField::Price => "price",
            SortField::Name => "name",
            SortField::Rating => "ratings.average",
            SortField::DiscountPercentage => "discountPercentage",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn direction(self) -> i32 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub sort_by: SortField,
    pub sort_order: SortOrder,
    pub page: u64,
    pub limit: u64,
    pub populate: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            populate: false,
        }
    }
}

impl SearchOptions {
    /// Reads `sortBy`, `sortOrder`, `page`, `limit` and `populate`.
    /// Limits above the ceiling are clamped rather than rejected.
    pub fn from_query(query: &HashMap<String, String>, default_limit: u64) -> AppResult<Self> {
        let limit = parse_positive_int(query, "limit")?
            .unwrap_or(default_limit)
            .min(MAX_PAGE_LIMIT);
        let page = parse_positive_int(query, "page")?.unwrap_or(1);
        if checked_skip(page, limit).is_none() {
            return Err(AppError::invalid_field("page", "page is out of range"));
        }

        Ok(SearchOptions {
            sort_by: parse_enum(query, "sortBy")?.unwrap_or_default(),
            sort_order: parse_enum(query, "sortOrder")?.unwrap_or_default(),
            page,
            limit,
            populate: parse_bool(query, "populate")?.unwrap_or(false),
        })
    }

    /// Documents before this page; saturates for options not built by `from_query`.
    pub fn skip(&self) -> i64 {
        checked_skip(self.page, self.limit).unwrap_or(i64::MAX)
    }
}

/// `(page - 1) * limit` when it fits a BSON int64.
fn checked_skip(page: u64, limit: u64) -> Option<i64> {
    page.checked_sub(1)
        .and_then(|p| p.checked_mul(limit))
        .and_then(|skip| i64::try_from(skip).ok())
}

fn low_stock_threshold() -> bson::Bson {
    bson::Bson::Document(doc! {
        "$ifNull": ["$inventory.lowStockThreshold", DEFAULT_LOW_STOCK_THRESHOLD]
    })
}

pub fn discount_stage() -> Document {
    doc! {
        "$addFields": {
            "discountPercentage": {
                "$cond": {
                    "if": {
                        "$and": [
                            { "$gt": ["$originalPrice", 0] },
                            { "$lt": ["$price", "$originalPrice"] }
                        ]
                    },
                    // floor(x + 0.5) so the result agrees with `discount_percentage`
                    "then": {
                        "$floor": {
                            "$add": [
                                {
                                    "$multiply": [
                                        { "$divide": [{ "$subtract": ["$originalPrice", "$price"] }, "$originalPrice"] },
                                        100
                                    ]
                                },
                                0.5
                            ]
                        }
                    },
                    "else": 0
                }
            }
        }
    }
}

pub fn stock_status_stage() -> Document {
    doc! {
        "$addFields": {
            "stockStatus": {
                "$switch": {
                    "branches": [
                        {
                            "case": { "$lte": ["$inventory.quantity", 0] },
                            "then": StockStatus::OUT_OF_STOCK
                        },
                        {
                            "case": {
                                "$lte": ["$inventory.quantity", low_stock_threshold()]
                            },
                            "then": StockStatus::LOW_STOCK
                        }
                    ],
                    "default": StockStatus::IN_STOCK
                }
            }
        }
    }
}

/// Joins the creator's public fields as a single `seller` object.
pub fn seller_lookup_stages() -> Vec<Document> {
    vec![
        doc! {
            "$lookup": {
                "from": USERS_COLLECTION,
                "let": { "sellerId": "$createdBy" },
                "pipeline": [
                    { "$match": { "$expr": { "$eq": ["$_id", "$$sellerId"] } } },
                    { "$project": { "name": 1, "email": 1 } }
                ],
                "as": "seller"
            }
        },
        doc! {
            "$unwind": { "path": "$seller", "preserveNullAndEmptyArrays": true }
        },
    ]
}

fn sort_stages(options: &SearchOptions, text_search: bool) -> Vec<Document> {
    if options.sort_by == SortField::Relevance && text_search {
        return vec![
            doc! { "$addFields": { "textScore": { "$meta": "textScore" } } },
            doc! { "$sort": { "textScore": -1, "_id": 1 } },
        ];
    }

    let (field, direction) = if options.sort_by == SortField::Relevance {
        (SortField::CreatedAt.path(), SortOrder::Desc.direction())
    } else {
        (options.sort_by.path(), options.sort_order.direction())
    };
    let mut sort = Document::new();
    sort.insert(field, direction);
    sort.insert("_id", direction);
    vec![doc! { "$sort": sort }]
}

/// match → derived fields → sort → skip/limit → optional seller join.
pub fn build_search_pipeline(filter: Document, options: &SearchOptions) -> Vec<Document> {
    let text_search = filter.contains_key("$text");

    let mut pipeline = vec![
        doc! { "$match": filter },
        discount_stage(),
        stock_status_stage(),
    ];
    pipeline.extend(sort_stages(options, text_search));
    pipeline.push(doc! { "$skip": options.skip() });
    pipeline.push(doc! { "$limit": options.limit as i64 });

    if options.populate {
        pipeline.extend(seller_lookup_stages());
    }

    pipeline
}

/// Counts every match independently of the page being served.
pub fn build_count_pipeline(filter: Document) -> Vec<Document> {
    vec![doc! { "$match": filter }, doc! { "$count": "total" }]
}

pub fn build_category_pipeline() -> Vec<Document> {
    vec![
        doc! { "$match": { "status": "active" } },
        doc! {
            "$group": {
                "_id": "$category",
                "count": { "$sum": 1 },
                "averagePrice": { "$avg": "$price" },
                "subcategories": { "$addToSet": "$subcategory" }
            }
        },
        doc! { "$sort": { "count": -1, "_id": 1 } },
        doc! {
            "$project": {
                "_id": 0,
                "category": "$_id",
                "count": 1,
                "averagePrice": { "$round": ["$averagePrice", 2] },
                "subcategories": {
                    "$filter": { "input": "$subcategories", "as": "s", "cond": { "$ne": ["$$s", null] } }
                }
            }
        },
    ]
}

pub fn build_analytics_pipeline() -> Vec<Document> {
    vec![doc! {
        "$facet": {
            "totals": [
                {
                    "$group": {
                        "_id": null,
                        "totalProducts": { "$sum": 1 },
                        "averagePrice": { "$avg": "$price" },
                        "totalInventory": { "$sum": "$inventory.quantity" },
                        "outOfStock": {
                            "$sum": { "$cond": [{ "$lte": ["$inventory.quantity", 0] }, 1, 0] }
                        },
                        "lowStock": {
                            "$sum": {
                                "$cond": [
                                    {
                                        "$and": [
                                            { "$gt": ["$inventory.quantity", 0] },
                                            { "$lte": ["$inventory.quantity", low_stock_threshold()] }
                                        ]
                                    },
                                    1,
                                    0
                                ]
                            }
                        }
                    }
                },
                { "$project": { "_id": 0 } }
            ],
            "byStatus": [
                { "$group": { "_id": "$status", "count": { "$sum": 1 } } },
                { "$sort": { "_id": 1 } }
            ],
            "byCategory": [
                {
                    "$group": {
                        "_id": "$category",
                        "count": { "$sum": 1 },
                        "averagePrice": { "$avg": "$price" }
                    }
                },
                { "$sort": { "count": -1 } }
            ],
            "recent": [
                { "$sort": { "createdAt": -1 } },
                { "$limit": 5 },
                { "$project": { "name": 1, "price": 1, "category": 1, "createdAt": 1 } }
            ]
        }
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_names(pipeline: &[Document]) -> Vec<String> {
        pipeline
            .iter()
            .map(|stage| stage.keys().next().cloned().unwrap_or_default())
            .collect()
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn stages_are_ordered() {
        let options = SearchOptions {
            populate: true,
            ..Default::default()
        };
        let pipeline = build_search_pipeline(doc! { "category": "books" }, &options);
        assert_eq!(
            stage_names(&pipeline),
            vec!["$match", "$addFields", "$addFields", "$sort", "$skip", "$limit", "$lookup", "$unwind"]
        );
        assert_eq!(pipeline[0], doc! { "$match": { "category": "books" } });
    }

    #[test]
    fn populate_off_skips_the_join() {
        let pipeline = build_search_pipeline(Document::new(), &SearchOptions::default());
        assert!(!stage_names(&pipeline).contains(&"$lookup".to_string()));
    }

    #[test]
    fn skip_and_limit_follow_page() {
        let options = SearchOptions {
            page: 3,
            limit: 15,
            ..Default::default()
        };
        let pipeline = build_search_pipeline(Document::new(), &options);
        assert!(pipeline.contains(&doc! { "$skip": 30_i64 }));
        assert!(pipeline.contains(&doc! { "$limit": 15_i64 }));
    }

    #[test]
    fn huge_page_is_rejected_instead_of_overflowing() {
        let huge = query(&[("page", "100000000000000000"), ("limit", "100")]);
        assert!(matches!(
            SearchOptions::from_query(&huge, DEFAULT_PAGE_LIMIT),
            Err(AppError::Validation { .. })
        ));

        let max = i64::MAX.to_string();
        assert!(SearchOptions::from_query(&query(&[("page", max.as_str())]), 1).is_ok());

        let far = SearchOptions {
            page: u64::MAX,
            limit: MAX_PAGE_LIMIT,
            ..Default::default()
        };
        assert_eq!(far.skip(), i64::MAX);
    }

    #[test]
    fn stock_thresholds_agree_between_listing_and_analytics() {
        let listing = stock_status_stage().to_string();
        let analytics = build_analytics_pipeline()[0].to_string();
        let threshold = low_stock_threshold().to_string();
        assert!(listing.contains(&threshold));
        assert!(analytics.contains(&threshold));
    }

    #[test]
    fn field_sort_uses_requested_direction() {
        let options = SearchOptions {
            sort_by: SortField::Price,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let pipeline = build_search_pipeline(Document::new(), &options);
        assert_eq!(pipeline[3], doc! { "$sort": { "price": 1, "_id": 1 } });

        let rating = SearchOptions {
            sort_by: SortField::Rating,
            ..Default::default()
        };
        let pipeline = build_search_pipeline(Document::new(), &rating);
        assert_eq!(pipeline[3], doc! { "$sort": { "ratings.average": -1, "_id": -1 } });
    }

    #[test]
    fn relevance_sorts_by_text_score_only_with_text() {
        let options = SearchOptions {
            sort_by: SortField::Relevance,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };

        let with_text = build_search_pipeline(doc! { "$text": { "$search": "bike" } }, &options);
        assert_eq!(
            with_text[3],
            doc! { "$addFields": { "textScore": { "$meta": "textScore" } } }
        );
        assert_eq!(with_text[4], doc! { "$sort": { "textScore": -1, "_id": 1 } });

        let without_text = build_search_pipeline(Document::new(), &options);
        assert_eq!(without_text[3], doc! { "$sort": { "createdAt": -1, "_id": -1 } });
    }

    #[test]
    fn count_pipeline_reuses_the_match() {
        let filter = doc! { "price": { "$gte": 10.0 } };
        assert_eq!(
            build_count_pipeline(filter.clone()),
            vec![doc! { "$match": filter }, doc! { "$count": "total" }]
        );
    }

    #[test]
    fn options_parse_and_validate() {
        let options = SearchOptions::from_query(
            &query(&[
                ("sortBy", "price"),
                ("sortOrder", "asc"),
                ("page", "2"),
                ("limit", "500"),
                ("populate", "true"),
            ]),
            DEFAULT_PAGE_LIMIT,
        )
        .unwrap();
        assert_eq!(options.sort_by, SortField::Price);
        assert_eq!(options.sort_order, SortOrder::Asc);
        assert_eq!(options.page, 2);
        assert_eq!(options.limit, MAX_PAGE_LIMIT);
        assert!(options.populate);

        let defaults = SearchOptions::from_query(&HashMap::new(), DEFAULT_PAGE_LIMIT).unwrap();
        assert_eq!(defaults, SearchOptions::default());

        assert!(SearchOptions::from_query(&query(&[("page", "0")]), 20).is_err());
        assert!(SearchOptions::from_query(&query(&[("limit", "0")]), 20).is_err());
        assert!(SearchOptions::from_query(&query(&[("limit", "ten")]), 20).is_err());
        assert!(SearchOptions::from_query(&query(&[("sortBy", "colour")]), 20).is_err());
    }
}
