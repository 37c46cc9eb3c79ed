//! REST API request and response types.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// `?feature=<name>` query of the opendata endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeatureQuery {
    pub feature: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            service: "geomerge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Names of the loaded description documents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesResponse {
    pub features: Vec<String>,
}

/// Create an error response body
pub fn error_response(error: &str) -> Value {
    json!({
        "requestId": Uuid::new_v4().to_string(),
        "status": "error",
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let body = error_response("Unknown feature: lakes");
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "Unknown feature: lakes");
        assert!(Uuid::parse_str(body["requestId"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_feature_query_optional() {
        let query: FeatureQuery = serde_json::from_value(json!({})).unwrap();
        assert!(query.feature.is_none());
    }
}
