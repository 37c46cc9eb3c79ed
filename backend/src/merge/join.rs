//! Join strategies applied to one base row per mapping rule.
//!
//! - equality: copy the fields of the first target row whose key equals the base key
//! - aggregate (`geo`): substring-match a literal, attach every target row and average
//!   the value group

use serde_json::Value;
use std::collections::HashMap;

use crate::error::{MergeError, MergeResult};
use crate::models::{lookup_path, MappingRule, Row, RowKind};

/// Property receiving the aggregate mean.
pub const MEAN_PROPERTY: &str = "mean";

/// Text form of a scalar used for loose key comparison. Null, arrays and objects
/// never match anything.
pub fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric reading of a value. Strings may use a comma as decimal separator.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

// =============================================================================
// Equality join
// =============================================================================

/// Target rows of one rule indexed by their key. The first row with a given key wins.
pub struct EqualityIndex<'a> {
    rows: &'a [Row],
    by_key: HashMap<String, usize>,
}

impl<'a> EqualityIndex<'a> {
    pub fn build(rows: &'a [Row], target_field: &str) -> Self {
        let mut by_key = HashMap::new();
        for (i, row) in rows.iter().enumerate() {
            if let Some(key) = row.lookup(target_field).and_then(scalar_key) {
                by_key.entry(key).or_insert(i);
            }
        }
        Self { rows, by_key }
    }

    pub fn find(&self, key: &Value) -> Option<&'a Row> {
        let key = scalar_key(key)?;
        self.by_key.get(&key).map(|&i| &self.rows[i])
    }
}

/// Copy the matched target's fields onto `row`. Later rules overwrite earlier ones.
pub fn equality_join(row: &mut Row, rule: &MappingRule, index: &EqualityIndex<'_>) -> bool {
    let Some(matched) = row.lookup(&rule.source_field).and_then(|key| index.find(key)) else {
        return false;
    };
    let fields = matched.fields().clone();
    let target = row.fields_mut();
    for (key, value) in fields {
        target.insert(key, value);
    }
    true
}

// =============================================================================
// Aggregate join
// =============================================================================

/// Case-insensitive substring match of the rule's literal against the base row's
/// source field. On a match every target row is appended to the feature's `match`
/// list and, with a value group, the mean over that list is stored.
pub fn aggregate_join(
    row: &mut Row,
    base_dataset: &str,
    rule: &MappingRule,
    targets: &[Row],
    value_group: Option<&str>,
) -> MergeResult<bool> {
    if row.kind() != RowKind::Feature {
        return Err(MergeError::ShapeMismatch {
            dataset: base_dataset.to_string(),
            expected: RowKind::Feature.as_str(),
            found: row.kind().as_str(),
        });
    }

    let haystack = row
        .lookup(&rule.source_field)
        .and_then(scalar_key)
        .map(|s| s.to_lowercase());
    let needle = rule.target_field.to_lowercase();
    match haystack {
        Some(haystack) if haystack.contains(&needle) => {}
        _ => return Ok(false),
    }

    let Row::Feature(feature) = row else {
        return Ok(false);
    };
    feature.matches.extend(targets.iter().map(Row::to_value));
    if let Some(field) = value_group {
        let mean = mean_of(&feature.matches, field);
        feature
            .properties
            .insert(MEAN_PROPERTY.to_string(), Value::from(mean));
    }
    Ok(true)
}

/// Mean of `field` across matched rows. Feature rows are read through `properties`.
pub fn mean_of(rows: &[Value], field: &str) -> f64 {
    let values: Vec<Value> = rows
        .iter()
        .filter_map(|row| {
            let record = match row.get("properties").and_then(Value::as_object) {
                Some(properties) if row.get("type").and_then(Value::as_str) == Some("Feature") => {
                    properties
                }
                _ => row.as_object()?,
            };
            lookup_path(record, field).cloned()
        })
        .collect();
    mean(&values)
}

/// Mean of the numeric values; anything non-numeric is ignored. Empty input gives 0.
pub fn mean(values: &[Value]) -> f64 {
    let numbers: Vec<f64> = values.iter().filter_map(coerce_number).collect();
    if numbers.is_empty() {
        0.0
    } else {
        numbers.iter().sum::<f64>() / numbers.len() as f64
    }
}
