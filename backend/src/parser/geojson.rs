//! JSON/GeoJSON normalizer.
//!
//! Upstream portals wrap GeoJSON in assorted envelopes (`{"data": {...}}`,
//! `{"result": {"geojson": ...}}`). We accept a bare Feature or FeatureCollection and
//! otherwise search the envelope keys for one. JSON tables (arrays of plain objects)
//! become record rows. An empty array is an empty feature collection.

use serde_json::Value;

use crate::error::{FormatError, FormatResult};
use crate::models::{DatasetRows, Feature, FeatureCollection, Record};

/// Keys searched, in order, when the document is not GeoJSON itself.
pub const ENVELOPE_KEYS: [&str; 4] = ["features", "geojson", "data", "result"];

const MAX_DEPTH: usize = 8;

/// Parse raw bytes into features or records.
pub fn parse_json(bytes: &[u8]) -> FormatResult<DatasetRows> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| FormatError::MalformedData(format!("invalid JSON: {}", e)))?;
    normalize(value)
}

/// Find the feature collection, or failing that a table of records, inside an
/// arbitrary JSON document.
pub fn normalize(value: Value) -> FormatResult<DatasetRows> {
    if let Some(mut collection) = find_collection(&value, 0)? {
        if collection.crs.is_none() {
            collection.crs = value.get("crs").cloned();
        }
        return Ok(DatasetRows::Features(collection));
    }
    if let Some(records) = find_records(&value, 0) {
        return Ok(DatasetRows::Records(records));
    }
    Err(FormatError::MalformedData(
        "no FeatureCollection, Feature, feature array or record array found".to_string(),
    ))
}

fn geojson_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

fn find_collection(value: &Value, depth: usize) -> FormatResult<Option<FeatureCollection>> {
    if depth > MAX_DEPTH {
        return Ok(None);
    }

    match value {
        Value::Object(map) => {
            match geojson_type(value) {
                Some("FeatureCollection") => {
                    return serde_json::from_value(value.clone())
                        .map(Some)
                        .map_err(|e| FormatError::MalformedData(e.to_string()));
                }
                Some("Feature") => {
                    let feature: Feature = serde_json::from_value(value.clone())
                        .map_err(|e| FormatError::MalformedData(e.to_string()))?;
                    return Ok(Some(FeatureCollection::new(vec![feature])));
                }
                _ => {}
            }

            for key in ENVELOPE_KEYS {
                if let Some(inner) = map.get(key) {
                    if let Some(collection) = find_collection(inner, depth + 1)? {
                        return Ok(Some(collection));
                    }
                }
            }
            Ok(None)
        }
        Value::Array(items) if items.iter().all(|item| geojson_type(item) == Some("Feature")) => {
            let features = items
                .iter()
                .cloned()
                .map(serde_json::from_value)
                .collect::<Result<Vec<Feature>, _>>()
                .map_err(|e| FormatError::MalformedData(e.to_string()))?;
            Ok(Some(FeatureCollection::new(features)))
        }
        _ => Ok(None),
    }
}

/// A non-empty array of plain objects, at the top level or under an envelope key.
fn find_records(value: &Value, depth: usize) -> Option<Vec<Record>> {
    if depth > MAX_DEPTH {
        return None;
    }

    match value {
        Value::Array(items)
            if !items.is_empty()
                && items
                    .iter()
                    .all(|item| item.is_object() && geojson_type(item) != Some("Feature")) =>
        {
            Some(items.iter().filter_map(Value::as_object).cloned().collect())
        }
        Value::Object(map) => ENVELOPE_KEYS
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(|inner| find_records(inner, depth + 1)),
        _ => None,
    }
}
