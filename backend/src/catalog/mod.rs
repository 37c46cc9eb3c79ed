//! CKAN catalog resolution: descriptor to downloadable resource URL(s).
//!
//! A plain package yields one resource. A `collection` package yields one dated
//! resource per child package; children resolve concurrently and a failing child
//! is skipped.

pub mod ckan;

use futures::future::join_all;
use reqwest::Url;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{CatalogError, DatasetResult, FetchError, FormatError};
use crate::fetch::RetryingFetcher;
use crate::models::{DatasetDescriptor, ResourceFormat};

pub use ckan::{CkanResponse, Package, Relationship, Resource};

/// Preference order when a child package has no resource with the requested id.
const FORMAT_PREFERENCE: [ResourceFormat; 4] = [
    ResourceFormat::Csv,
    ResourceFormat::GeoJson,
    ResourceFormat::Json,
    ResourceFormat::Shp,
];

/// A resource ready to download.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedResource {
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub url: String,
    pub format: ResourceFormat,
    #[serde(skip)]
    pub headers: Option<Vec<String>>,
}

/// `package_show` URL for a catalog id.
pub fn package_show_url(host: &str, catalog_id: &str) -> Result<String, FetchError> {
    let base = format!("https://{}/api/action/package_show", host);
    Url::parse_with_params(&base, &[("id", catalog_id)])
        .map(|url| url.to_string())
        .map_err(|e| FetchError::InvalidUrl {
            url: base,
            message: e.to_string(),
        })
}

/// Rewrite a leading `http:` to `https:`.
pub fn force_https(url: &str) -> String {
    match url.strip_prefix("http:") {
        Some(rest) => format!("https:{}", rest),
        None => url.to_string(),
    }
}

#[derive(Clone)]
pub struct CatalogResolver {
    fetcher: RetryingFetcher,
}

impl CatalogResolver {
    pub fn new(fetcher: RetryingFetcher) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &RetryingFetcher {
        &self.fetcher
    }

    /// Fetch and unwrap `package_show` for `catalog_id` on `host`.
    pub async fn fetch_package(&self, host: &str, catalog_id: &str) -> DatasetResult<Package> {
        self.fetcher.allow_list().check_host(host)?;
        let url = package_show_url(host, catalog_id)?;
        let response = self.fetcher.fetch(&url).await?;

        let envelope: CkanResponse<Package> = serde_json::from_slice(&response.body)
            .map_err(|e| CatalogError::InvalidResponse(e.to_string()))?;
        if !envelope.success {
            let message = envelope
                .error
                .map(|e| e.describe())
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(CatalogError::Rejected {
                package: catalog_id.to_string(),
                message,
            }
            .into());
        }
        envelope.result.ok_or_else(|| {
            CatalogError::InvalidResponse(format!("package '{}' has no result", catalog_id)).into()
        })
    }

    /// Resolve a descriptor to one resource, or one per child for collections.
    pub async fn resolve(
        &self,
        descriptor: &DatasetDescriptor,
    ) -> DatasetResult<Vec<ResolvedResource>> {
        let package = self
            .fetch_package(&descriptor.host, &descriptor.catalog_id)
            .await?;

        if package.is_collection() {
            return Ok(self.resolve_children(descriptor, &package).await);
        }

        let resource = package
            .resources
            .iter()
            .find(|r| r.id == descriptor.resource_id)
            .ok_or_else(|| CatalogError::ResourceNotFound {
                package: descriptor.catalog_id.clone(),
                resource: descriptor.resource_id.clone(),
            })?;
        let format = ResourceFormat::from_declared(&resource.format).ok_or_else(|| {
            FormatError::Unsupported(format!(
                "resource '{}' declares format '{}'",
                resource.id, resource.format
            ))
        })?;

        debug!(dataset = %descriptor.catalog_id, format = %format, "Resolved resource");
        Ok(vec![ResolvedResource {
            dataset_id: descriptor.catalog_id.clone(),
            child_id: None,
            date: None,
            url: force_https(&resource.url),
            format,
            headers: descriptor.field_headers.clone(),
        }])
    }

    async fn resolve_children(
        &self,
        descriptor: &DatasetDescriptor,
        package: &Package,
    ) -> Vec<ResolvedResource> {
        let child_ids = package.child_ids();
        debug!(
            dataset = %descriptor.catalog_id,
            children = child_ids.len(),
            "Resolving collection"
        );

        let tasks = child_ids.iter().map(|child_id| async move {
            let result = self.resolve_child(descriptor, child_id).await;
            if let Err(err) = &result {
                warn!(
                    dataset = %descriptor.catalog_id,
                    child = %child_id,
                    error = %err,
                    "Skipping collection child"
                );
            }
            result.ok()
        });

        join_all(tasks).await.into_iter().flatten().collect()
    }

    async fn resolve_child(
        &self,
        descriptor: &DatasetDescriptor,
        child_id: &str,
    ) -> DatasetResult<ResolvedResource> {
        let child = self.fetch_package(&descriptor.host, child_id).await?;
        let (resource, format) = select_child_resource(&child, &descriptor.resource_id)
            .ok_or_else(|| CatalogError::ResourceNotFound {
                package: child_id.to_string(),
                resource: descriptor.resource_id.clone(),
            })?;

        Ok(ResolvedResource {
            dataset_id: descriptor.catalog_id.clone(),
            child_id: Some(child.id.clone()),
            date: child.snapshot_date(),
            url: force_https(&resource.url),
            format,
            headers: descriptor.field_headers.clone(),
        })
    }
}

/// The resource matching `resource_id`, else the first in format preference order.
fn select_child_resource<'a>(
    package: &'a Package,
    resource_id: &str,
) -> Option<(&'a Resource, ResourceFormat)> {
    if let Some(resource) = package.resources.iter().find(|r| r.id == resource_id) {
        if let Some(format) = ResourceFormat::from_declared(&resource.format) {
            return Some((resource, format));
        }
    }
    FORMAT_PREFERENCE.iter().find_map(|wanted| {
        package
            .resources
            .iter()
            .find(|r| ResourceFormat::from_declared(&r.format) == Some(*wanted))
            .map(|r| (r, *wanted))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::DatasetError;
    use crate::fetch::testing::{fetcher, StaticTransport};
    use serde_json::{json, Value};
    use std::sync::Arc;

    pub const HOST: &str = "opendata.schleswig-holstein.de";

    pub fn package_url(id: &str) -> String {
        package_show_url(HOST, id).unwrap()
    }

    pub fn package_ok(result: Value) -> Value {
        json!({ "help": "", "success": true, "result": result })
    }

    pub fn descriptor(id: &str, resource_id: &str) -> DatasetDescriptor {
        DatasetDescriptor {
            host: HOST.to_string(),
            catalog_id: id.to_string(),
            resource_id: resource_id.to_string(),
            title: id.to_string(),
            field_headers: None,
        }
    }

    #[test]
    fn test_package_url_and_https() {
        assert_eq!(
            package_url("badestellen"),
            "https://opendata.schleswig-holstein.de/api/action/package_show?id=badestellen"
        );
        assert_eq!(force_https("http://a/b.csv"), "https://a/b.csv");
        assert_eq!(force_https("https://a/b.csv"), "https://a/b.csv");
    }

    #[tokio::test]
    async fn test_resolve_plain_package() {
        let transport = Arc::new(StaticTransport::new().json(
            &package_url("stammdaten"),
            package_ok(json!({
                "id": "stammdaten",
                "resources": [
                    { "id": "other", "format": "PDF", "url": "http://h/x.pdf" },
                    { "id": "r1", "format": "CSV", "url": "http://h/stammdaten.csv" }
                ]
            })),
        ));
        let resolver = CatalogResolver::new(fetcher(transport));

        let resolved = resolver.resolve(&descriptor("stammdaten", "r1")).await.unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].url, "https://h/stammdaten.csv");
        assert_eq!(resolved[0].format, ResourceFormat::Csv);
        assert!(resolved[0].child_id.is_none());
    }

    #[tokio::test]
    async fn test_catalog_failure_is_rejected() {
        let transport = Arc::new(StaticTransport::new().json(
            &package_url("missing"),
            json!({ "help": "", "success": false, "error": { "message": "Not found", "__type": "Not Found Error" } }),
        ));
        let resolver = CatalogResolver::new(fetcher(transport));

        let err = resolver.resolve(&descriptor("missing", "r1")).await.unwrap_err();

        assert!(matches!(err, DatasetError::Catalog(CatalogError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_missing_resource() {
        let transport = Arc::new(StaticTransport::new().json(
            &package_url("p"),
            package_ok(json!({ "id": "p", "resources": [] })),
        ));
        let resolver = CatalogResolver::new(fetcher(transport));

        let err = resolver.resolve(&descriptor("p", "r1")).await.unwrap_err();

        assert!(matches!(
            err,
            DatasetError::Catalog(CatalogError::ResourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_disallowed_host_fails_without_request() {
        let transport = Arc::new(StaticTransport::new());
        let resolver = CatalogResolver::new(fetcher(transport.clone()));
        let mut desc = descriptor("p", "r1");
        desc.host = "example.com".to_string();

        let err = resolver.resolve(&desc).await.unwrap_err();

        assert!(matches!(err, DatasetError::Fetch(FetchError::HostNotAllowed(_))));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_collection_children() {
        let transport = Arc::new(
            StaticTransport::new()
                .json(
                    &package_url("einstufung"),
                    package_ok(json!({
                        "id": "einstufung",
                        "type": "collection",
                        "relationships_as_object": [
                            { "type": "child_of", "__extras": { "subject_package_id": "e-2023" } },
                            { "type": "child_of", "__extras": { "subject_package_id": "e-broken" } },
                            { "type": "child_of", "__extras": { "subject_package_id": "e-2022" } }
                        ]
                    })),
                )
                .json(
                    &package_url("e-2023"),
                    package_ok(json!({
                        "id": "e-2023",
                        "temporal_start": "2023-05-01",
                        "resources": [
                            { "id": "x", "format": "PDF", "url": "http://h/x.pdf" },
                            { "id": "y", "format": "CSV", "url": "http://h/2023.csv" }
                        ]
                    })),
                )
                .json(
                    &package_url("e-2022"),
                    package_ok(json!({
                        "id": "e-2022",
                        "metadata_created": "2022-06-01T08:00:00",
                        "resources": [{ "id": "z", "format": "GeoJSON", "url": "https://h/2022.geojson" }]
                    })),
                ),
        );
        let resolver = CatalogResolver::new(fetcher(transport));

        let resolved = resolver.resolve(&descriptor("einstufung", "unused")).await.unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].child_id.as_deref(), Some("e-2023"));
        assert_eq!(resolved[0].date.as_deref(), Some("2023-05-01"));
        assert_eq!(resolved[0].url, "https://h/2023.csv");
        assert_eq!(resolved[1].format, ResourceFormat::GeoJson);
        assert_eq!(resolved[1].date.as_deref(), Some("2022-06-01T08:00:00"));
    }
}
