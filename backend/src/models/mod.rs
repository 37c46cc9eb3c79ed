//! Domain models for the geomerge pipeline.
//!
//! - [`DatasetDescription`] - the declarative input document (datasets + mappings + options)
//! - [`DatasetDescriptor`] - one remote catalog resource
//! - [`MappingRule`] - a join condition between two datasets
//! - [`MergeOptions`] - drives join strategy and output shape
//! - [`ResourceFormat`] - formats we know how to parse
//! - [`FetchedDataset`] - parsed but unmerged result of one resolved resource
//!
//! GeoJSON shapes and the [`Row`] union live in [`feature`].

pub mod feature;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use feature::{
    lookup_path, DatasetRows, Feature, FeatureCollection, Geometry, Record, Row, RowKind,
};

/// Default latitude column when the options don't name one.
pub const DEFAULT_LATITUDE_FIELD: &str = "latitude";

/// Default longitude column when the options don't name one.
pub const DEFAULT_LONGITUDE_FIELD: &str = "longitude";

// =============================================================================
// Description Document
// =============================================================================

/// One remote resource inside a CKAN catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Catalog host, must be on the allow-list.
    pub host: String,
    /// CKAN package id.
    #[serde(rename = "id")]
    pub catalog_id: String,
    /// Resource id inside the package.
    pub resource_id: String,
    #[serde(default)]
    pub title: String,
    /// Fixed header list for header-less, pipe-delimited files.
    #[serde(default, rename = "headers", skip_serializing_if = "Option::is_none")]
    pub field_headers: Option<Vec<String>>,
}

/// Declares how a base dataset joins a target dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    #[serde(rename = "source_db_id")]
    pub source_dataset_id: String,
    /// Dot-path into the base row.
    #[serde(rename = "source_db_field")]
    pub source_field: String,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(rename = "target_db_id")]
    pub target_dataset_id: String,
    /// Dot-path into the target row, or a literal value in `geo` mode.
    #[serde(rename = "target_db_field")]
    pub target_field: String,
}

fn default_condition() -> String {
    "=".to_string()
}

/// Which join strategy and output shape a merge run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeKind {
    /// One output collection per dated snapshot of the base dataset.
    Series,
    /// Substring match + aggregate over the target dataset.
    Geo,
    /// Anything else: plain equality join.
    #[default]
    #[serde(other)]
    Plain,
}

/// An option that is either shared by all datasets or keyed per dataset id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PerDataset {
    Shared(String),
    ByDataset(BTreeMap<String, String>),
}

impl PerDataset {
    /// Value that applies to `dataset_id`, if any.
    pub fn for_dataset(&self, dataset_id: &str) -> Option<&str> {
        match self {
            PerDataset::Shared(value) => Some(value.as_str()),
            PerDataset::ByDataset(values) => values.get(dataset_id).map(String::as_str),
        }
    }
}

/// A popup line shown by the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopupDetail {
    pub label: String,
    /// Property name or list of property names.
    pub prop: serde_json::Value,
}

/// Options attached to a description document.
///
/// Besides steering the merge, the whole struct is copied onto every output
/// feature so the presentation layer knows how to render it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeOptions {
    #[serde(default)]
    pub label_option: String,
    #[serde(default)]
    pub legend_option: String,
    #[serde(rename = "type", default)]
    pub kind: MergeKind,
    /// Field averaged across matched rows in `geo` mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_group: Option<String>,
    #[serde(default)]
    pub display_option: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popup_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub popup_details: Vec<PopupDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<PerDataset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude_field: Option<PerDataset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude_field: Option<PerDataset>,
}

impl MergeOptions {
    /// CRS override for a dataset.
    pub fn crs_for(&self, dataset_id: &str) -> Option<&str> {
        self.crs.as_ref().and_then(|c| c.for_dataset(dataset_id))
    }

    pub fn latitude_field_for(&self, dataset_id: &str) -> &str {
        self.latitude_field
            .as_ref()
            .and_then(|f| f.for_dataset(dataset_id))
            .unwrap_or(DEFAULT_LATITUDE_FIELD)
    }

    pub fn longitude_field_for(&self, dataset_id: &str) -> &str {
        self.longitude_field
            .as_ref()
            .and_then(|f| f.for_dataset(dataset_id))
            .unwrap_or(DEFAULT_LONGITUDE_FIELD)
    }
}

/// The declarative input document: what to fetch and how to join it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescription {
    pub datasets: Vec<DatasetDescriptor>,
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
    #[serde(default)]
    pub options: MergeOptions,
}

impl DatasetDescription {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Id of the dataset every mapping rule is applied against.
    pub fn base_dataset_id(&self) -> Option<&str> {
        self.mappings.first().map(|m| m.source_dataset_id.as_str())
    }

    pub fn declares(&self, dataset_id: &str) -> bool {
        self.datasets.iter().any(|d| d.catalog_id == dataset_id)
    }
}

// =============================================================================
// Resource Formats
// =============================================================================

/// Resource formats the parsers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceFormat {
    Csv,
    Json,
    GeoJson,
    Shp,
}

impl ResourceFormat {
    /// Map a CKAN `format` string. Unknown formats yield `None`.
    pub fn from_declared(format: &str) -> Option<Self> {
        match format.trim().to_uppercase().as_str() {
            "CSV" => Some(Self::Csv),
            "JSON" => Some(Self::Json),
            "GEOJSON" => Some(Self::GeoJson),
            "SHP" => Some(Self::Shp),
            _ => None,
        }
    }

    /// Whether a downloaded resource looks like this format, judged by URL suffix
    /// or response content type.
    pub fn accepts(&self, url: &str, content_type: Option<&str>) -> bool {
        let lower_url = url.to_lowercase();
        let path = lower_url.split(['?', '#']).next().unwrap_or("");
        let content_type = content_type.unwrap_or("").to_lowercase();
        match self {
            Self::Csv => path.ends_with(".csv") || content_type.contains("text/csv"),
            Self::Json | Self::GeoJson => path.ends_with("json") || content_type.contains("json"),
            Self::Shp => path.ends_with(".zip") || content_type.contains("zip"),
        }
    }
}

impl fmt::Display for ResourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Csv => "CSV",
            Self::Json => "JSON",
            Self::GeoJson => "GeoJSON",
            Self::Shp => "SHP",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Fetched Dataset
// =============================================================================

/// The parsed, not yet merged, result of one resolved resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchedDataset {
    /// Descriptor id this dataset was fetched for.
    pub id: String,
    /// Child package id for series members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
    /// ISO date of the snapshot, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub rows: DatasetRows,
    /// Delimited rows whose width differed from the header.
    #[serde(skip_serializing_if = "is_zero")]
    pub width_mismatches: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl FetchedDataset {
    pub fn new(id: impl Into<String>, rows: DatasetRows) -> Self {
        Self {
            id: id.into(),
            child_id: None,
            date: None,
            rows,
            width_mismatches: 0,
        }
    }

    pub fn with_width_mismatches(mut self, width_mismatches: usize) -> Self {
        self.width_mismatches = width_mismatches;
        self
    }

    pub fn with_child(mut self, child_id: impl Into<String>, date: Option<String>) -> Self {
        self.child_id = Some(child_id.into());
        self.date = date;
        self
    }
}
