//! JSON Schema validation for dataset description documents.
//!
//! The schema is embedded at compile time from `schemas/dataset-description.json`
//! and checked with JSON Schema Draft 7.

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};

static DESCRIPTION_SCHEMA: Lazy<Result<Value, String>> = Lazy::new(|| {
    serde_json::from_str(include_str!("../../schemas/dataset-description.json"))
        .map_err(|e| format!("Invalid embedded schema: {}", e))
});

/// Validate a JSON value against a schema.
///
/// Returns every violation as a message.
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Validate a description document against the embedded schema.
pub fn validate_description(data: &Value) -> ConfigResult<()> {
    let schema = DESCRIPTION_SCHEMA
        .as_ref()
        .map_err(|e| ConfigError::Schema { errors: vec![e.clone()] })?;
    validate(schema, data).map_err(|errors| ConfigError::Schema { errors })
}

pub fn is_valid_description(data: &Value) -> bool {
    validate_description(data).is_ok()
}
