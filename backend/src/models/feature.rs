//! GeoJSON shapes and the joinable [`Row`] union.
//!
//! Upstream GeoJSON is loosely specified, so geometries keep their coordinates as raw
//! JSON and only `Point` gets typed accessors. Unknown members survive a round trip
//! through the `extra` maps.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/// A flat record: column name to value. Delimited text produces string values only.
pub type Record = Map<String, Value>;

fn feature_type() -> String {
    "Feature".to_string()
}

fn collection_type() -> String {
    "FeatureCollection".to_string()
}

/// GeoJSON allows `"properties": null`.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Record, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Record>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Geometry
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub coordinates: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: json!([x, y]),
            extra: Map::new(),
        }
    }

    pub fn is_point(&self) -> bool {
        self.kind == "Point"
    }

    /// `(x, y)` of a `Point`; `None` for other kinds or malformed coordinates.
    pub fn point_coordinates(&self) -> Option<(f64, f64)> {
        if !self.is_point() {
            return None;
        }
        let coords = self.coordinates.as_array()?;
        Some((coords.first()?.as_f64()?, coords.get(1)?.as_f64()?))
    }

    /// Replace x/y of a `Point`, keeping any extra ordinates (z, m).
    pub fn set_point_coordinates(&mut self, x: f64, y: f64) {
        let mut coords = vec![json!(x), json!(y)];
        if let Some(existing) = self.coordinates.as_array() {
            coords.extend(existing.iter().skip(2).cloned());
        }
        self.coordinates = Value::Array(coords);
    }
}

// =============================================================================
// Feature
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default = "feature_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Record,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,
    /// Rows appended by the aggregate join.
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Option<Geometry>, properties: Record) -> Self {
        Self {
            kind: feature_type(),
            id: None,
            geometry,
            properties,
            bbox: None,
            matches: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn point_coordinates(&self) -> Option<(f64, f64)> {
        self.geometry.as_ref().and_then(Geometry::point_coordinates)
    }

    pub fn is_point(&self) -> bool {
        self.geometry.as_ref().is_some_and(Geometry::is_point)
    }
}

// =============================================================================
// Feature Collection
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default = "collection_type")]
    pub kind: String,
    #[serde(default)]
    pub features: Vec<Feature>,
    /// Snapshot date (`YYYY-MM-DD`) for series output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: collection_type(),
            features,
            date: None,
            crs: None,
            extra: Map::new(),
        }
    }

    pub fn with_date(mut self, date: Option<String>) -> Self {
        self.date = date;
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// `crs.properties.name`, the legacy GeoJSON way of naming a CRS.
    pub fn crs_name(&self) -> Option<&str> {
        self.crs.as_ref()?.get("properties")?.get("name")?.as_str()
    }
}

// =============================================================================
// Rows
// =============================================================================

/// Discriminator checked before every join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKind {
    Record,
    Feature,
}

impl RowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowKind::Record => "record",
            RowKind::Feature => "feature",
        }
    }
}

/// A joinable row: either a flat record or a geometry feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Row {
    Record(Record),
    Feature(Feature),
}

impl Row {
    pub fn kind(&self) -> RowKind {
        match self {
            Row::Record(_) => RowKind::Record,
            Row::Feature(_) => RowKind::Feature,
        }
    }

    /// The property bag: the record itself, or a feature's `properties`.
    pub fn fields(&self) -> &Record {
        match self {
            Row::Record(record) => record,
            Row::Feature(feature) => &feature.properties,
        }
    }

    pub fn fields_mut(&mut self) -> &mut Record {
        match self {
            Row::Record(record) => record,
            Row::Feature(feature) => &mut feature.properties,
        }
    }

    /// Resolve a dot-path. Features resolve against `properties` first; a leading
    /// `properties.` segment and the feature `id` are understood too.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        match self {
            Row::Record(record) => lookup_path(record, path),
            Row::Feature(feature) => lookup_path(&feature.properties, path)
                .or_else(|| {
                    path.strip_prefix("properties.")
                        .and_then(|rest| lookup_path(&feature.properties, rest))
                })
                .or_else(|| if path == "id" { feature.id.as_ref() } else { None }),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Row::Record(record) => Value::Object(record.clone()),
            Row::Feature(feature) => serde_json::to_value(feature).unwrap_or(Value::Null),
        }
    }
}

/// Resolve `a.b.c` in a record. A literal key containing dots wins over traversal.
pub fn lookup_path<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Parsed rows of one dataset: uniform records or a feature collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DatasetRows {
    Records(Vec<Record>),
    Features(FeatureCollection),
}

impl DatasetRows {
    pub fn kind(&self) -> RowKind {
        match self {
            DatasetRows::Records(_) => RowKind::Record,
            DatasetRows::Features(_) => RowKind::Feature,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DatasetRows::Records(records) => records.len(),
            DatasetRows::Features(collection) => collection.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every row, tagged.
    pub fn to_rows(&self) -> Vec<Row> {
        match self {
            DatasetRows::Records(records) => records.iter().cloned().map(Row::Record).collect(),
            DatasetRows::Features(collection) => {
                collection.features.iter().cloned().map(Row::Feature).collect()
            }
        }
    }
}
