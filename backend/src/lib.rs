//! # Geomerge - declarative open-data fetch-and-merge
//!
//! Geomerge reads a dataset description (datasets on CKAN catalogs plus field-level
//! mapping rules), downloads every resource, parses it, and joins the rows into
//! GeoJSON point collections in WGS84.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │    CKAN     │────▶│   Fetcher   │────▶│   Parsers   │────▶│    Merge    │
//! │  (resolve)  │     │ (retry/429) │     │ CSV/GJ/SHP  │     │ (join/CRS)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use geomerge::{AppConfig, DatasetDescription, MergeEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = AppConfig::from_env().unwrap();
//!     let engine = MergeEngine::from_config(&config).unwrap();
//!     let description = DatasetDescription::from_json(&std::fs::read_to_string("bathing.json").unwrap()).unwrap();
//!     let output = engine.run(&description).await.unwrap();
//!     println!("Merged {} features", output.feature_count());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Error types per layer
//! - [`models`] - Descriptions, rows and GeoJSON types
//! - [`config`] - Environment configuration
//! - [`fetch`] - Retrying HTTP fetcher with host allow-list
//! - [`catalog`] - CKAN resource resolution
//! - [`parser`] - CSV, GeoJSON and Shapefile parsing
//! - [`projection`] - CRS reprojection to WGS84
//! - [`merge`] - Join engine and output shaping
//! - [`cache`] - TTL response cache
//! - [`descriptions`] - Description registry
//! - [`validation`] - Description schema validation
//! - [`api`] - HTTP API server

// Core modules
pub mod config;
pub mod error;
pub mod models;

// Fetching
pub mod catalog;
pub mod fetch;

// Parsing
pub mod parser;
pub mod projection;

// Merging
pub mod merge;

// Descriptions
pub mod descriptions;
pub mod validation;

// Caching
pub mod cache;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    CatalogError, ConfigError, DatasetError, FetchError, FormatError, MergeError,
    ProjectionError, ServerError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    DatasetDescription, DatasetDescriptor, DatasetRows, Feature, FeatureCollection,
    FetchedDataset, Geometry, MappingRule, MergeKind, MergeOptions, Record, ResourceFormat, Row,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use catalog::{CatalogResolver, ResolvedResource};
pub use config::AppConfig;
pub use fetch::{HostAllowList, HttpTransport, ReqwestTransport, RetryPolicy, RetryingFetcher};
pub use merge::{DatasetUrls, MergeEngine, MergeOutput};
pub use parser::{
    decode_content, detect_delimiter, parse_file, parse_resource, ParseResult, ParsedResource,
};
pub use projection::{CoordinateReprojector, Crs, Envelope};

// =============================================================================
// Re-exports - Registry, cache and validation
// =============================================================================

pub use cache::ResponseCache;
pub use descriptions::DescriptionRegistry;
pub use validation::{is_valid_description, validate_description};

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
