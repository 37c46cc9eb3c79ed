//! Error types for the geomerge fetch-and-merge pipeline.
//!
//! Errors are split by layer:
//!
//! - [`FetchError`] - HTTP transport, retry budget, allow-list
//! - [`FormatError`] - resource formats and parsing
//! - [`ProjectionError`] - coordinate reference systems
//! - [`CatalogError`] - CKAN metadata resolution
//! - [`DatasetError`] - everything that can go wrong for one dataset (isolated per dataset)
//! - [`MergeError`] - merge-time structural errors (abort the whole run)
//! - [`ConfigError`] - description documents and environment configuration
//! - [`ServerError`] - HTTP API
//!
//! `From` conversions let `?` cross layer boundaries.

use thiserror::Error;

// =============================================================================
// Fetch Errors
// =============================================================================

/// Errors raised while downloading from an upstream host.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL's host is not on the allow-list. Raised before any request is made.
    #[error("Host '{0}' is not allowed")]
    HostNotAllowed(String),

    /// The URL could not be parsed.
    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Transport-level failure (DNS, TLS, connection reset, ...).
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// The per-request deadline elapsed.
    #[error("Request to '{0}' timed out")]
    Timeout(String),

    /// Upstream answered with a non-success status.
    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Upstream kept answering 429 until the retry budget ran out.
    #[error("Rate limited by upstream after {attempts} attempts")]
    RateLimited { attempts: u32 },
}

// =============================================================================
// Format Errors
// =============================================================================

/// Errors raised while interpreting downloaded bytes.
#[derive(Debug, Error)]
pub enum FormatError {
    /// Resource format or content type is not one we can parse.
    #[error("Unsupported format: {0}")]
    Unsupported(String),

    /// JSON is present but no feature envelope could be found.
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// Shapefile archive could not be converted to GeoJSON.
    #[error("Failed to convert shapefile to GeoJSON: {0}")]
    Conversion(String),

    /// Delimited text could not be read.
    #[error("Invalid delimited text: {0}")]
    Delimited(String),
}

impl From<csv::Error> for FormatError {
    fn from(err: csv::Error) -> Self {
        FormatError::Delimited(err.to_string())
    }
}

// =============================================================================
// Projection Errors
// =============================================================================

/// Errors raised by the coordinate reprojector.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// CRS identifier is unknown or malformed.
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    /// The proj definition for a known CRS was rejected.
    #[error("Invalid projection definition for {crs}: {message}")]
    InvalidDefinition { crs: String, message: String },

    /// A single coordinate could not be transformed.
    #[error("Transform failed: {0}")]
    Transform(String),
}

// =============================================================================
// Catalog Errors
// =============================================================================

/// Errors raised while resolving a dataset through the CKAN API.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog answered `success: false`.
    #[error("Catalog rejected package '{package}': {message}")]
    Rejected { package: String, message: String },

    /// The package has no resource with the requested id.
    #[error("Resource '{resource}' not found in package '{package}'")]
    ResourceNotFound { package: String, resource: String },

    /// The catalog response could not be decoded.
    #[error("Invalid catalog response: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// Dataset Errors (isolated per dataset)
// =============================================================================

/// Everything that can fail for a single dataset.
///
/// These never abort a batch: the engine logs them and treats the dataset as absent.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

// =============================================================================
// Merge Errors (abort the run)
// =============================================================================

/// Structural errors found while merging. These abort the whole run.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A join expected one row shape and found the other.
    #[error("Shape mismatch in dataset '{dataset}': expected {expected} row, found {found} row")]
    ShapeMismatch {
        dataset: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The mapping configuration is inconsistent with the declared or fetched datasets.
    #[error("Invalid merge configuration: {0}")]
    Config(String),
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading description documents or environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid description JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Description failed schema validation: {errors:?}")]
    Schema { errors: Vec<String> },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unknown feature: {0}")]
    UnknownFeature(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

pub type FetchResult<T> = Result<T, FetchError>;

pub type FormatResult<T> = Result<T, FormatError>;

pub type ProjectionResult<T> = Result<T, ProjectionError>;

pub type DatasetResult<T> = Result<T, DatasetError>;

pub type MergeResult<T> = Result<T, MergeError>;

pub type ConfigResult<T> = Result<T, ConfigError>;

pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let fetch_err = FetchError::Status {
            status: 500,
            message: "Internal Server Error".into(),
        };
        let dataset_err: DatasetError = fetch_err.into();
        assert!(dataset_err.to_string().contains("500"));

        let format_err = FormatError::MalformedData("no features".into());
        let dataset_err: DatasetError = format_err.into();
        assert!(dataset_err.to_string().contains("no features"));
    }

    #[test]
    fn test_shape_mismatch_format() {
        let err = MergeError::ShapeMismatch {
            dataset: "lakes".into(),
            expected: "feature",
            found: "record",
        };
        let msg = err.to_string();
        assert!(msg.contains("lakes"));
        assert!(msg.contains("expected feature"));

        let server_err: ServerError = err.into();
        assert!(server_err.to_string().starts_with("Merge failed"));
    }
}
