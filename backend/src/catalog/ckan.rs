//! CKAN `package_show` response shapes. Only the fields we read are modelled.

use serde::{Deserialize, Serialize};

/// Envelope of every CKAN action response.
#[derive(Debug, Clone, Deserialize)]
pub struct CkanResponse<T> {
    #[serde(default)]
    pub help: String,
    pub success: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<CkanError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CkanError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "__type", default)]
    pub kind: String,
}

impl CkanError {
    pub fn describe(&self) -> String {
        match (self.kind.is_empty(), self.message.is_empty()) {
            (false, false) => format!("{}: {}", self.kind, self.message),
            (false, true) => self.kind.clone(),
            _ => self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Package {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub relationships_as_object: Vec<Relationship>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub extras: Vec<Extra>,
    #[serde(default)]
    pub temporal_start: Option<String>,
    #[serde(default)]
    pub metadata_created: Option<String>,
}

impl Package {
    pub fn is_collection(&self) -> bool {
        self.kind == "collection"
    }

    /// Ids of packages declaring themselves `child_of` this one.
    pub fn child_ids(&self) -> Vec<String> {
        self.relationships_as_object
            .iter()
            .filter(|r| r.kind == "child_of")
            .filter_map(|r| r.extras.subject_package_id.clone())
            .collect()
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    /// Snapshot date: `temporal_start`, then the `temporal_start`/`issued` extras,
    /// then `metadata_created`.
    pub fn snapshot_date(&self) -> Option<String> {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        non_empty(&self.temporal_start)
            .or_else(|| self.extra("temporal_start").map(String::from))
            .or_else(|| self.extra("issued").map(String::from))
            .or_else(|| non_empty(&self.metadata_created))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Resource {
    pub id: String,
    #[serde(default)]
    pub package_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Relationship {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "__extras", default)]
    pub extras: RelationshipExtras,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RelationshipExtras {
    #[serde(default)]
    pub object_package_id: Option<String>,
    #[serde(default)]
    pub subject_package_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Extra {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failure_envelope() {
        let response: CkanResponse<Package> = serde_json::from_value(json!({
            "help": "https://example/api/3/action/help_show?name=package_show",
            "success": false,
            "error": { "message": "Nicht gefunden", "__type": "Not Found Error" }
        }))
        .unwrap();

        assert!(!response.success);
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().describe(), "Not Found Error: Nicht gefunden");
    }

    #[test]
    fn test_children_and_date() {
        let package: Package = serde_json::from_value(json!({
            "id": "p1",
            "type": "collection",
            "relationships_as_object": [
                { "type": "child_of", "__extras": { "subject_package_id": "c1", "object_package_id": "p1" } },
                { "type": "links_to", "__extras": { "subject_package_id": "x" } },
                { "type": "child_of", "__extras": { "subject_package_id": "c2" } }
            ],
            "extras": [{ "key": "issued", "value": "2023-05-01T00:00:00" }],
            "metadata_created": "2024-01-01T10:00:00"
        }))
        .unwrap();

        assert!(package.is_collection());
        assert_eq!(package.child_ids(), vec!["c1", "c2"]);
        assert_eq!(package.snapshot_date().as_deref(), Some("2023-05-01T00:00:00"));
    }
}
