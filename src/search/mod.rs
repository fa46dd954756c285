//! Product search: query-string parsing, filter construction, aggregation
//! pipelines and page arithmetic. Nothing here touches the database.

pub mod filter;
pub mod pagination;
pub mod pipeline;

pub use filter::{build_filter, GeoRadius, SearchParams};
pub use pagination::Pagination;
pub use pipeline::{build_count_pipeline, build_search_pipeline, SearchOptions};
