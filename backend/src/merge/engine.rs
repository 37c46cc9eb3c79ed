//! Fetch-and-merge orchestration.
//!
//! 1. Resolve, download and parse every declared dataset concurrently
//! 2. Pick the base snapshot(s) from the first mapping rule
//! 3. Join each base row against the rule targets
//! 4. Turn rows into point features, wrap per snapshot, reproject if configured
//! 5. Drop empty collections and sort by date
//!
//! A dataset that fails in step 1 is logged and left out. Errors in later steps
//! abort the run.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::join::{aggregate_join, equality_join, EqualityIndex};
use super::output::{finalize, rows_to_features, truncate_to_day, MergeOutput};
use crate::api::logs::{log_error, log_info, log_success, log_warning};
use crate::catalog::{CatalogResolver, ResolvedResource};
use crate::config::AppConfig;
use crate::error::{DatasetResult, FetchResult, MergeError, MergeResult};
use crate::fetch::{ReqwestTransport, RetryingFetcher};
use crate::models::{
    DatasetDescription, DatasetDescriptor, DatasetRows, FeatureCollection, FetchedDataset,
    MergeKind, ResourceFormat, Row,
};
use crate::parser::parse_resource;
use crate::projection::{CoordinateReprojector, Crs};

/// Resolved URLs of one declared dataset.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetUrls {
    pub id: String,
    pub title: String,
    pub resources: Vec<ResolvedResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct MergeEngine {
    resolver: CatalogResolver,
    reprojector: CoordinateReprojector,
}

impl MergeEngine {
    pub fn new(resolver: CatalogResolver, reprojector: CoordinateReprojector) -> Self {
        Self {
            resolver,
            reprojector,
        }
    }

    /// Engine over a real HTTP client configured from `config`.
    pub fn from_config(config: &AppConfig) -> FetchResult<Self> {
        let transport = ReqwestTransport::new(config.request_timeout)?;
        let fetcher = RetryingFetcher::new(Arc::new(transport), config.retry, config.allow_list());
        Ok(Self::new(
            CatalogResolver::new(fetcher),
            CoordinateReprojector::new(config.envelope),
        ))
    }

    pub fn resolver(&self) -> &CatalogResolver {
        &self.resolver
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    /// Download and parse one resolved resource, normalizing features to WGS84.
    ///
    /// `source_crs` takes precedence over the CRS a GeoJSON document or a
    /// shapefile `.prj` declares. Records keep their raw coordinates until merge.
    async fn load_resource(
        &self,
        resource: ResolvedResource,
        source_crs: Option<Crs>,
    ) -> DatasetResult<FetchedDataset> {
        let bytes = self
            .resolver
            .fetcher()
            .download(&resource.url, resource.format)
            .await?;
        let parsed = parse_resource(
            resource.format,
            &bytes,
            resource.headers.as_deref(),
            source_crs,
        )?;

        let rows = match parsed.rows {
            DatasetRows::Features(collection) if resource.format != ResourceFormat::Shp => {
                DatasetRows::Features(self.normalize_features(collection, source_crs))
            }
            rows => rows,
        };
        if parsed.width_mismatches > 0 {
            warn!(
                dataset = %resource.dataset_id,
                url = %resource.url,
                rows = parsed.width_mismatches,
                "Rows with unexpected width"
            );
        }

        let dataset = FetchedDataset::new(resource.dataset_id, rows)
            .with_width_mismatches(parsed.width_mismatches);
        Ok(match resource.child_id {
            Some(child_id) => dataset.with_child(child_id, resource.date),
            None => dataset,
        })
    }

    fn normalize_features(
        &self,
        collection: FeatureCollection,
        source_crs: Option<Crs>,
    ) -> FeatureCollection {
        if let Some(crs) = source_crs {
            return self.reprojector.reproject(collection, crs);
        }
        match collection.crs_name().map(String::from) {
            Some(crs) => self.reprojector.reproject_named(collection, &crs),
            None => collection,
        }
    }

    /// Fetch one descriptor. Collections yield one dataset per child; a failing
    /// child is skipped while a failing plain resource fails the descriptor.
    pub async fn fetch_dataset(
        &self,
        descriptor: &DatasetDescriptor,
        source_crs: Option<Crs>,
    ) -> DatasetResult<Vec<FetchedDataset>> {
        let resources = self.resolver.resolve(descriptor).await?;
        let is_collection = resources.iter().any(|r| r.child_id.is_some());

        let loads = resources.into_iter().map(|r| self.load_resource(r, source_crs));
        let mut datasets = Vec::new();
        for result in join_all(loads).await {
            match result {
                Ok(dataset) => datasets.push(dataset),
                Err(err) if is_collection => {
                    warn!(
                        dataset = %descriptor.catalog_id,
                        error = %err,
                        "Skipping collection child"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(datasets)
    }

    /// Fetch every declared dataset concurrently. Failures are logged and absent
    /// from the result.
    pub async fn fetch_all(&self, description: &DatasetDescription) -> Vec<FetchedDataset> {
        let tasks = description.datasets.iter().map(|descriptor| async move {
            let source_crs = source_crs_for(description, &descriptor.catalog_id);
            (descriptor, self.fetch_dataset(descriptor, source_crs).await)
        });

        let mut fetched = Vec::new();
        for (descriptor, result) in join_all(tasks).await {
            match result {
                Ok(datasets) => {
                    let rows: usize = datasets.iter().map(|d| d.rows.len()).sum();
                    log_success(format!(
                        "Fetched {} ({} snapshot(s), {} rows)",
                        descriptor.catalog_id,
                        datasets.len(),
                        rows
                    ));
                    let mismatches: usize = datasets.iter().map(|d| d.width_mismatches).sum();
                    if mismatches > 0 {
                        log_warning(format!(
                            "{}: {} row(s) did not match the header width",
                            descriptor.catalog_id, mismatches
                        ));
                    }
                    fetched.extend(datasets);
                }
                Err(err) => {
                    log_error(format!("Failed to fetch {}: {}", descriptor.catalog_id, err));
                }
            }
        }
        fetched
    }

    /// Resolve every declared dataset to its resource URLs.
    pub async fn resolve_urls(&self, description: &DatasetDescription) -> Vec<DatasetUrls> {
        let tasks = description.datasets.iter().map(|descriptor| async move {
            let result = self.resolver.resolve(descriptor).await;
            let (resources, error) = match result {
                Ok(resources) => (resources, None),
                Err(err) => {
                    warn!(dataset = %descriptor.catalog_id, error = %err, "URL resolution failed");
                    (Vec::new(), Some(err.to_string()))
                }
            };
            DatasetUrls {
                id: descriptor.catalog_id.clone(),
                title: descriptor.title.clone(),
                resources,
                error,
            }
        });
        join_all(tasks).await
    }

    // =========================================================================
    // Merging
    // =========================================================================

    /// Fetch everything a description declares and merge it.
    pub async fn run(&self, description: &DatasetDescription) -> MergeResult<MergeOutput> {
        check_rules(description)?;
        log_info(format!("Fetching {} dataset(s)", description.datasets.len()));
        let fetched = self.fetch_all(description).await;
        self.merge(description, fetched)
    }

    /// Merge already fetched datasets.
    pub fn merge(
        &self,
        description: &DatasetDescription,
        fetched: Vec<FetchedDataset>,
    ) -> MergeResult<MergeOutput> {
        check_rules(description)?;
        let options = &description.options;
        let series = options.kind == MergeKind::Series;

        let bases: Vec<&FetchedDataset> = match description.base_dataset_id() {
            None => fetched.iter().collect(),
            Some(base_id) if series => fetched.iter().filter(|d| d.id == base_id).collect(),
            Some(base_id) => {
                let base = fetched.iter().find(|d| d.id == base_id).ok_or_else(|| {
                    MergeError::Config(format!("Base dataset '{}' was not fetched", base_id))
                })?;
                vec![base]
            }
        };

        // Target rows per rule, concatenated across snapshots in fetch order
        let targets: Vec<Option<Vec<Row>>> = description
            .mappings
            .iter()
            .map(|rule| {
                let rows: Vec<Row> = fetched
                    .iter()
                    .filter(|d| d.id == rule.target_dataset_id)
                    .flat_map(|d| d.rows.to_rows())
                    .collect();
                let present = fetched.iter().any(|d| d.id == rule.target_dataset_id);
                if !present {
                    log_warning(format!(
                        "Target dataset {} is unavailable, rule on {} skipped",
                        rule.target_dataset_id, rule.source_field
                    ));
                }
                present.then_some(rows)
            })
            .collect();

        let indexes: Vec<Option<EqualityIndex<'_>>> = description
            .mappings
            .iter()
            .zip(&targets)
            .map(|(rule, rows)| {
                rows.as_ref()
                    .filter(|_| options.kind != MergeKind::Geo)
                    .map(|rows| EqualityIndex::build(rows, &rule.target_field))
            })
            .collect();

        let mut collections = Vec::with_capacity(bases.len());
        for base in bases {
            let mut rows = base.rows.to_rows();
            let mut matched = 0usize;

            for row in rows.iter_mut() {
                let mut row_matched = false;
                for (i, rule) in description.mappings.iter().enumerate() {
                    let Some(target_rows) = targets[i].as_ref() else {
                        continue;
                    };
                    row_matched |= match options.kind {
                        MergeKind::Geo => aggregate_join(
                            row,
                            &base.id,
                            rule,
                            target_rows,
                            options.value_group.as_deref(),
                        )?,
                        MergeKind::Series | MergeKind::Plain => match &indexes[i] {
                            Some(index) => equality_join(row, rule, index),
                            None => false,
                        },
                    };
                }
                if row_matched {
                    matched += 1;
                }
            }

            let features = rows_to_features(
                rows,
                options,
                options.latitude_field_for(&base.id),
                options.longitude_field_for(&base.id),
            );
            let mut collection = FeatureCollection::new(features)
                .with_date(base.date.as_deref().map(truncate_to_day));
            // Feature datasets were normalized to WGS84 when loaded
            if let (DatasetRows::Records(_), Some(crs)) = (&base.rows, options.crs_for(&base.id)) {
                collection = self.reprojector.reproject_named(collection, crs);
            }

            debug!(
                dataset = %base.id,
                date = ?collection.date,
                rows = base.rows.len(),
                matched,
                features = collection.len(),
                "Merged snapshot"
            );
            collections.push(collection);
        }

        let collections = finalize(collections);
        let output = MergeOutput::from_collections(collections, series);
        info!(
            collections = output.collections().len(),
            features = output.feature_count(),
            "Merge complete"
        );
        log_success(format!(
            "Merged {} feature(s) in {} collection(s)",
            output.feature_count(),
            output.collections().len()
        ));
        Ok(output)
    }
}

/// The configured CRS override of a dataset. An unparseable override is logged
/// and ignored so that declared projections still apply.
fn source_crs_for(description: &DatasetDescription, dataset_id: &str) -> Option<Crs> {
    let name = description.options.crs_for(dataset_id)?;
    match Crs::parse(name) {
        Ok(crs) => Some(crs),
        Err(err) => {
            warn!(dataset = dataset_id, crs = name, error = %err, "Ignoring CRS override");
            None
        }
    }
}

/// Every rule must reference datasets the document declares.
pub fn check_rules(description: &DatasetDescription) -> MergeResult<()> {
    for rule in &description.mappings {
        for id in [&rule.source_dataset_id, &rule.target_dataset_id] {
            if !description.declares(id) {
                return Err(MergeError::Config(format!(
                    "Mapping references undeclared dataset '{}'",
                    id
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{descriptor, package_ok, package_url};
    use crate::fetch::testing::{fetcher, StaticTransport};
    use crate::models::{Feature, Geometry, MappingRule, MergeOptions, Record};
    use serde_json::{json, Value};

    fn engine(transport: Arc<StaticTransport>) -> MergeEngine {
        MergeEngine::new(
            CatalogResolver::new(fetcher(transport)),
            CoordinateReprojector::default(),
        )
    }

    fn records(value: Value) -> DatasetRows {
        DatasetRows::Records(serde_json::from_value(value).unwrap())
    }

    fn rule(source: &str, source_field: &str, target: &str, target_field: &str) -> MappingRule {
        MappingRule {
            source_dataset_id: source.into(),
            source_field: source_field.into(),
            condition: "=".into(),
            target_dataset_id: target.into(),
            target_field: target_field.into(),
        }
    }

    fn description(
        ids: &[&str],
        mappings: Vec<MappingRule>,
        options: MergeOptions,
    ) -> DatasetDescription {
        DatasetDescription {
            datasets: ids.iter().map(|id| descriptor(id, "r")).collect(),
            mappings,
            options,
        }
    }

    fn collections(output: MergeOutput) -> Vec<FeatureCollection> {
        match output {
            MergeOutput::Single(c) => vec![c],
            MergeOutput::Series(c) => c,
        }
    }

    #[test]
    fn test_equality_merge() {
        let engine = engine(Arc::new(StaticTransport::new()));
        let doc = description(
            &["base", "target"],
            vec![rule("base", "id", "target", "id")],
            MergeOptions::default(),
        );
        let fetched = vec![
            FetchedDataset::new(
                "base",
                records(json!([
                    { "id": "1", "latitude": "54.3", "longitude": "10.1" },
                    { "id": "2", "latitude": "54.4", "longitude": "10.2" }
                ])),
            ),
            FetchedDataset::new("target", records(json!([{ "id": "2", "val": "x" }]))),
        ];

        let output = engine.merge(&doc, fetched).unwrap();

        let MergeOutput::Single(collection) = output else {
            panic!("single collection expected")
        };
        assert_eq!(collection.len(), 2);
        assert!(collection.features[0].properties.get("val").is_none());
        assert_eq!(collection.features[1].properties["val"], "x");
        assert!(collection.features[1].properties["options"].is_object());
    }

    #[test]
    fn test_series_snapshots_sorted() {
        let engine = engine(Arc::new(StaticTransport::new()));
        let options = MergeOptions {
            kind: MergeKind::Series,
            ..Default::default()
        };
        let doc = description(
            &["einstufung", "stamm"],
            vec![rule("einstufung", "id", "stamm", "id")],
            options,
        );
        let snapshot = |child: &str, date: &str| {
            FetchedDataset::new(
                "einstufung",
                records(json!([{ "id": "a", "latitude": "54", "longitude": "10" }])),
            )
            .with_child(child, Some(date.to_string()))
        };
        let fetched = vec![
            snapshot("c1", "2023-05-01T00:00:00"),
            snapshot("c2", "2022-06-01"),
            snapshot("c3", "2024-01-01T09:15:00"),
            FetchedDataset::new("stamm", records(json!([{ "id": "a", "NAME": "Strand" }]))),
        ];

        let output = collections(engine.merge(&doc, fetched).unwrap());

        let dates: Vec<&str> = output.iter().filter_map(|c| c.date.as_deref()).collect();
        assert_eq!(dates, vec!["2022-06-01", "2023-05-01", "2024-01-01"]);
        assert!(output.iter().all(|c| c.features[0].properties["NAME"] == "Strand"));
    }

    #[test]
    fn test_geo_merge() {
        let engine = engine(Arc::new(StaticTransport::new()));
        let options = MergeOptions {
            kind: MergeKind::Geo,
            value_group: Some("W".into()),
            ..Default::default()
        };
        let doc = description(
            &["lakes", "measurements"],
            vec![rule("lakes", "WK_NAME", "measurements", "plön")],
            options,
        );
        let mut props = Record::new();
        props.insert("WK_NAME".into(), json!("Großer Plöner See"));
        let lakes = FeatureCollection::new(vec![
            Feature::new(Some(Geometry::point(10.4, 54.1)), props),
            Feature::new(Some(Geometry::point(10.0, 54.0)), Record::new()),
        ]);
        let fetched = vec![
            FetchedDataset::new("lakes", DatasetRows::Features(lakes)),
            FetchedDataset::new(
                "measurements",
                records(json!([{ "W": "10" }, { "W": "20" }, { "W": "bad" }])),
            ),
        ];

        let output = collections(engine.merge(&doc, fetched).unwrap());

        let features = &output[0].features;
        assert_eq!(features[0].properties["mean"], 15.0);
        assert_eq!(features[0].matches.len(), 3);
        assert!(features[1].matches.is_empty());
    }

    #[test]
    fn test_geo_merge_on_records_aborts() {
        let engine = engine(Arc::new(StaticTransport::new()));
        let options = MergeOptions {
            kind: MergeKind::Geo,
            ..Default::default()
        };
        let doc = description(
            &["base", "target"],
            vec![rule("base", "name", "target", "x")],
            options,
        );
        let fetched = vec![
            FetchedDataset::new("base", records(json!([{ "name": "x" }]))),
            FetchedDataset::new("target", records(json!([{ "v": 1 }]))),
        ];

        let err = engine.merge(&doc, fetched).unwrap_err();
        assert!(matches!(err, MergeError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_config_errors() {
        let engine = engine(Arc::new(StaticTransport::new()));

        let undeclared = description(
            &["base"],
            vec![rule("base", "id", "ghost", "id")],
            MergeOptions::default(),
        );
        assert!(matches!(engine.merge(&undeclared, vec![]), Err(MergeError::Config(_))));

        let no_base = description(
            &["base", "target"],
            vec![rule("base", "id", "target", "id")],
            MergeOptions::default(),
        );
        assert!(matches!(engine.merge(&no_base, vec![]), Err(MergeError::Config(_))));
    }

    #[test]
    fn test_no_rules_every_dataset_is_a_base() {
        let engine = engine(Arc::new(StaticTransport::new()));
        let doc = description(&["a", "b"], vec![], MergeOptions::default());
        let fetched = vec![
            FetchedDataset::new("a", records(json!([{ "latitude": "54", "longitude": "10" }]))),
            FetchedDataset::new("b", records(json!([{ "latitude": "55", "longitude": "11" }]))),
        ];

        let output = engine.merge(&doc, fetched).unwrap();
        assert!(matches!(output, MergeOutput::Series(ref c) if c.len() == 2));
    }

    #[test]
    fn test_crs_override_reprojects_base() {
        let engine = engine(Arc::new(StaticTransport::new()));
        let options: MergeOptions = serde_json::from_value(json!({
            "crs": { "base": "EPSG:25832" },
            "latitude_field": "UTM_NORD",
            "longitude_field": "UTM_OST"
        }))
        .unwrap();
        let doc = description(&["base"], vec![], options);
        let fetched = vec![FetchedDataset::new(
            "base",
            records(json!([
                { "UTM_OST": "574000", "UTM_NORD": "6020000" },
                { "UTM_OST": "100000", "UTM_NORD": "1000000" }
            ])),
        )];

        let output = collections(engine.merge(&doc, fetched).unwrap());

        assert_eq!(output[0].len(), 1);
        let (lon, lat) = output[0].features[0].point_coordinates().unwrap();
        assert!((9.9..10.4).contains(&lon) && (54.2..54.5).contains(&lat));
    }

    /// Transport serving one single-resource package per `(id, format, url, content type, body)`.
    fn packages(entries: &[(&str, &str, &str, &str, String)]) -> Arc<StaticTransport> {
        let transport = entries.iter().fold(
            StaticTransport::new(),
            |transport, (id, format, url, content_type, body)| {
                transport
                    .json(
                        &package_url(id),
                        package_ok(json!({
                            "id": id,
                            "resources": [{ "id": "r", "format": format, "url": url }]
                        })),
                    )
                    .route(url, 200, content_type, body.clone())
            },
        );
        Arc::new(transport)
    }

    fn utm_harbour(crs: Option<&str>) -> String {
        let mut doc = json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [574000.0, 6020000.0] },
                "properties": { "name": "Hafen" }
            }]
        });
        if let Some(crs) = crs {
            doc["crs"] = json!({ "type": "name", "properties": { "name": crs } });
        }
        doc.to_string()
    }

    fn assert_near_kiel(output: MergeOutput) {
        let output = collections(output);
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].len(), 1);
        let (lon, lat) = output[0].features[0].point_coordinates().unwrap();
        assert!((10.0..10.3).contains(&lon), "lon {}", lon);
        assert!((54.2..54.5).contains(&lat), "lat {}", lat);
        assert_eq!(output[0].features[0].properties["name"], "Hafen");
    }

    const BASE_GEOJSON: &str = "https://opendata.schleswig-holstein.de/base.geojson";

    #[tokio::test]
    async fn test_geojson_with_crs_and_shared_override_projects_once() {
        let transport = packages(&[(
            "base",
            "GeoJSON",
            BASE_GEOJSON,
            "application/geo+json",
            utm_harbour(Some("urn:ogc:def:crs:EPSG::25832")),
        )]);
        let options: MergeOptions = serde_json::from_value(json!({ "crs": "EPSG:25832" })).unwrap();
        let doc = description(&["base"], vec![], options);

        assert_near_kiel(engine(transport).run(&doc).await.unwrap());
    }

    #[tokio::test]
    async fn test_geojson_declared_crs_without_override() {
        let transport = packages(&[(
            "base",
            "GeoJSON",
            BASE_GEOJSON,
            "application/geo+json",
            utm_harbour(Some("EPSG:25832")),
        )]);
        let doc = description(&["base"], vec![], MergeOptions::default());

        assert_near_kiel(engine(transport).run(&doc).await.unwrap());
    }

    #[tokio::test]
    async fn test_override_wins_over_declared_crs() {
        let transport = packages(&[(
            "base",
            "GeoJSON",
            BASE_GEOJSON,
            "application/geo+json",
            utm_harbour(Some("EPSG:4326")),
        )]);
        let options: MergeOptions =
            serde_json::from_value(json!({ "crs": { "base": "EPSG:25832" } })).unwrap();
        let doc = description(&["base"], vec![], options);

        assert_near_kiel(engine(transport).run(&doc).await.unwrap());
    }

    #[tokio::test]
    async fn test_json_records_resource_merges() {
        let url = "https://opendata.schleswig-holstein.de/base.json";
        let body = json!({
            "success": true,
            "result": [
                { "id": "1", "latitude": 54.3, "longitude": 10.1 },
                { "id": "2", "latitude": "54.4", "longitude": "10.2" }
            ]
        });
        let transport = packages(&[("base", "JSON", url, "application/json", body.to_string())]);
        let doc = description(&["base"], vec![], MergeOptions::default());

        let output = collections(engine(transport).run(&doc).await.unwrap());

        assert_eq!(output[0].len(), 2);
        assert_eq!(output[0].features[0].point_coordinates(), Some((10.1, 54.3)));
    }

    #[tokio::test]
    async fn test_width_mismatches_carried_on_dataset() {
        let url = "https://opendata.schleswig-holstein.de/base.csv";
        let csv = "id;latitude;longitude\n1;54.3;10.1\n2\n3;54.5;10.3;extra".to_string();
        let transport = packages(&[("base", "CSV", url, "text/csv", csv)]);

        let datasets = engine(transport)
            .fetch_dataset(&descriptor("base", "r"), None)
            .await
            .unwrap();

        assert_eq!(datasets.len(), 1);
        assert_eq!(datasets[0].rows.len(), 3);
        assert_eq!(datasets[0].width_mismatches, 2);
    }

    #[tokio::test]
    async fn test_failing_dataset_does_not_block_others() {
        let transport = Arc::new(
            StaticTransport::new()
                .json(
                    &package_url("base"),
                    package_ok(json!({
                        "id": "base",
                        "resources": [{ "id": "r", "format": "CSV", "url": "http://opendata.schleswig-holstein.de/base.csv" }]
                    })),
                )
                .route(
                    "https://opendata.schleswig-holstein.de/base.csv",
                    200,
                    "text/csv",
                    "id;latitude;longitude\n1;54.3;10.1\n2;54.4;10.2",
                )
                .json(
                    &package_url("target"),
                    package_ok(json!({
                        "id": "target",
                        "resources": [{ "id": "r", "format": "CSV", "url": "https://opendata.schleswig-holstein.de/target.csv" }]
                    })),
                )
                .route(
                    "https://opendata.schleswig-holstein.de/target.csv",
                    200,
                    "text/csv",
                    "id;val\n2;x",
                )
                .json(
                    &package_url("broken"),
                    package_ok(json!({
                        "id": "broken",
                        "resources": [{ "id": "r", "format": "CSV", "url": "https://opendata.schleswig-holstein.de/broken.csv" }]
                    })),
                )
                .route(
                    "https://opendata.schleswig-holstein.de/broken.csv",
                    500,
                    "text/plain",
                    "boom",
                ),
        );
        let engine = engine(transport.clone());
        let doc = description(
            &["base", "broken", "target"],
            vec![
                rule("base", "id", "broken", "id"),
                rule("base", "id", "target", "id"),
            ],
            MergeOptions::default(),
        );

        let output = engine.run(&doc).await.unwrap();

        let collections = collections(output);
        assert_eq!(collections[0].len(), 2);
        assert_eq!(collections[0].features[1].properties["val"], "x");
        assert_eq!(transport.calls_to("https://opendata.schleswig-holstein.de/broken.csv"), 1);
    }

    #[tokio::test]
    async fn test_resolve_urls_reports_errors() {
        let transport = Arc::new(StaticTransport::new().json(
            &package_url("base"),
            package_ok(json!({
                "id": "base",
                "resources": [{ "id": "r", "format": "CSV", "url": "http://h/base.csv" }]
            })),
        ));
        let engine = engine(transport);
        let doc = description(&["base", "missing"], vec![], MergeOptions::default());

        let urls = engine.resolve_urls(&doc).await;

        assert_eq!(urls[0].resources[0].url, "https://h/base.csv");
        assert!(urls[0].error.is_none());
        assert!(urls[1].error.is_some());
    }
}
