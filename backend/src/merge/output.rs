//! Shaping merged rows into dated point collections.

use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use super::join::coerce_number;
use crate::models::{Feature, FeatureCollection, Geometry, MergeOptions, Record, Row};

/// Property the active merge options are attached under.
pub const OPTIONS_PROPERTY: &str = "options";

/// Result of one merge run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MergeOutput {
    Single(FeatureCollection),
    Series(Vec<FeatureCollection>),
}

impl MergeOutput {
    /// Series runs and runs with anything but exactly one collection stay a list.
    pub fn from_collections(mut collections: Vec<FeatureCollection>, series: bool) -> Self {
        if !series && collections.len() == 1 {
            if let Some(single) = collections.pop() {
                return MergeOutput::Single(single);
            }
        }
        MergeOutput::Series(collections)
    }

    pub fn collections(&self) -> &[FeatureCollection] {
        match self {
            MergeOutput::Single(collection) => std::slice::from_ref(collection),
            MergeOutput::Series(collections) => collections,
        }
    }

    pub fn feature_count(&self) -> usize {
        self.collections().iter().map(FeatureCollection::len).sum()
    }
}

/// Point feature from a record's latitude/longitude fields. `None` when either
/// coordinate is missing or not numeric.
pub fn record_to_feature(
    record: Record,
    latitude_field: &str,
    longitude_field: &str,
) -> Option<Feature> {
    let latitude = record.get(latitude_field).and_then(coerce_number)?;
    let longitude = record.get(longitude_field).and_then(coerce_number)?;
    Some(Feature::new(Some(Geometry::point(longitude, latitude)), record))
}

/// Turn merged rows into features carrying the options. Geometry features are kept
/// as they are; records become points or are dropped.
pub fn rows_to_features(
    rows: Vec<Row>,
    options: &MergeOptions,
    latitude_field: &str,
    longitude_field: &str,
) -> Vec<Feature> {
    let options_value = serde_json::to_value(options).unwrap_or(Value::Null);
    rows.into_iter()
        .filter_map(|row| match row {
            Row::Feature(feature) => Some(feature),
            Row::Record(record) => record_to_feature(record, latitude_field, longitude_field),
        })
        .map(|mut feature| {
            feature
                .properties
                .insert(OPTIONS_PROPERTY.to_string(), options_value.clone());
            feature
        })
        .collect()
}

/// `YYYY-MM-DD` of an ISO timestamp or date. Unparseable input is kept as-is.
pub fn truncate_to_day(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return timestamp.date_naive().format("%Y-%m-%d").to_string();
    }
    match raw.get(..10).map(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d")) {
        Some(Ok(date)) => date.format("%Y-%m-%d").to_string(),
        _ => raw.to_string(),
    }
}

/// Drop empty collections and sort ascending by date; undated ones come first.
pub fn finalize(mut collections: Vec<FeatureCollection>) -> Vec<FeatureCollection> {
    collections.retain(|c| !c.is_empty());
    collections.sort_by(|a, b| {
        a.date
            .as_deref()
            .unwrap_or("")
            .cmp(b.date.as_deref().unwrap_or(""))
    });
    collections
}
