//! HTTP Server for the geomerge API.
//!
//! # API Endpoints
//!
//! | Method | Path                               | Description                          |
//! |--------|------------------------------------|--------------------------------------|
//! | GET    | `/health`                          | Health check                         |
//! | GET    | `/api/features`                    | Loaded description names             |
//! | GET    | `/api/opendata?feature=<name>`     | Merged output (cached)               |
//! | GET    | `/api/opendata/urls?feature=<name>`| Resolved resource URLs per dataset   |
//! | GET    | `/api/logs`                        | SSE stream for real-time logs        |

use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{sse::Event, IntoResponse, Json, Response, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use super::logs::{log_error, LOG_BROADCASTER};
use super::types::{error_response, FeatureQuery, FeaturesResponse, HealthResponse};
use crate::cache::ResponseCache;
use crate::config::AppConfig;
use crate::descriptions::DescriptionRegistry;
use crate::error::{ServerError, ServerResult};
use crate::merge::{DatasetUrls, MergeEngine, MergeOutput};
use crate::models::DatasetDescription;

/// Shared state of all handlers
pub struct AppState {
    pub engine: MergeEngine,
    pub registry: DescriptionRegistry,
    pub cache: ResponseCache<MergeOutput>,
}

impl AppState {
    pub fn new(
        engine: MergeEngine,
        registry: DescriptionRegistry,
        cache: ResponseCache<MergeOutput>,
    ) -> Self {
        Self {
            engine,
            registry,
            cache,
        }
    }

    fn description<'s, 'q>(&'s self, query: &'q FeatureQuery) -> ServerResult<(&'q str, &'s DatasetDescription)> {
        let feature = query
            .feature
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| ServerError::BadRequest("Missing 'feature' query parameter".into()))?;
        let description = self
            .registry
            .get(feature)
            .ok_or_else(|| ServerError::UnknownFeature(feature.to_string()))?;
        Ok((feature, description))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::UnknownFeature(_) => StatusCode::NOT_FOUND,
            ServerError::Merge(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(error_response(&self.to_string()))).into_response()
    }
}

/// Build the router over shared state
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/api/features", get(features))
        .route("/api/opendata", get(opendata))
        .route("/api/opendata/urls", get(opendata_urls))
        .route("/api/logs", get(sse_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = MergeEngine::from_config(&config)?;
    let registry = DescriptionRegistry::with_dir(&config.descriptions_dir);
    let cache = ResponseCache::new(config.cache_ttl);
    let state = Arc::new(AppState::new(engine, registry, cache));

    if state.cache.is_enabled() {
        let purge_state = state.clone();
        let ttl = config.cache_ttl;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(ttl);
            loop {
                interval.tick().await;
                let purged = purge_state.cache.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "Purged expired cache entries");
                }
            }
        });
    }

    let features = state.registry.names().join(", ");
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, features = %features, "geomerge server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::default())
}

async fn features(State(state): State<Arc<AppState>>) -> Json<FeaturesResponse> {
    Json(FeaturesResponse {
        features: state.registry.names().into_iter().map(String::from).collect(),
    })
}

/// Merged output of one feature, served from the cache while fresh
async fn opendata(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeatureQuery>,
) -> ServerResult<Json<MergeOutput>> {
    let (feature, description) = state.description(&query)?;

    if let Some(cached) = state.cache.get(feature).await {
        debug!(feature, "Serving merged output from cache");
        return Ok(Json(cached));
    }

    let output = state.engine.run(description).await.map_err(|e| {
        log_error(format!("Merge of {} failed: {}", feature, e));
        error!(feature, error = %e, "Merge failed");
        ServerError::from(e)
    })?;

    state.cache.insert(feature, output.clone()).await;
    Ok(Json(output))
}

async fn opendata_urls(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeatureQuery>,
) -> ServerResult<Json<Vec<DatasetUrls>>> {
    let (_, description) = state.description(&query)?;
    Ok(Json(state.engine.resolve_urls(description).await))
}

/// SSE endpoint for real-time log streaming
async fn sse_logs() -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = LOG_BROADCASTER.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => {
            let json = serde_json::to_string(&entry).ok()?;
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::{package_ok, package_url};
    use crate::catalog::CatalogResolver;
    use crate::fetch::testing::{fetcher, StaticTransport};
    use crate::projection::CoordinateReprojector;
    use serde_json::json;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    const BASE_CSV: &str = "https://opendata.schleswig-holstein.de/base.csv";

    const POINTS: &str = r#"{
        "datasets": [
            { "host": "opendata.schleswig-holstein.de", "id": "base", "resource_id": "r", "title": "Base" }
        ],
        "mappings": []
    }"#;

    const DANGLING: &str = r#"{
        "datasets": [
            { "host": "opendata.schleswig-holstein.de", "id": "base", "resource_id": "r" }
        ],
        "mappings": [
            { "source_db_id": "base", "source_db_field": "id", "target_db_id": "ghost", "target_db_field": "id" }
        ]
    }"#;

    fn transport() -> Arc<StaticTransport> {
        Arc::new(
            StaticTransport::new()
                .json(
                    &package_url("base"),
                    package_ok(json!({
                        "id": "base",
                        "resources": [{ "id": "r", "format": "CSV", "url": BASE_CSV }]
                    })),
                )
                .route(BASE_CSV, 200, "text/csv", "id;latitude;longitude\n1;54.3;10.1"),
        )
    }

    fn state(transport: Arc<StaticTransport>, ttl: Duration) -> (Arc<AppState>, TempDir) {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("points.json"), POINTS).unwrap();
        fs::write(dir.path().join("dangling.json"), DANGLING).unwrap();

        let engine = MergeEngine::new(
            CatalogResolver::new(fetcher(transport)),
            CoordinateReprojector::default(),
        );
        let state = AppState::new(
            engine,
            DescriptionRegistry::with_dir(dir.path()),
            ResponseCache::new(ttl),
        );
        (Arc::new(state), dir)
    }

    fn query(feature: Option<&str>) -> Query<FeatureQuery> {
        Query(FeatureQuery {
            feature: feature.map(String::from),
        })
    }

    #[tokio::test]
    async fn test_health_and_features() {
        let (state, _dir) = state(transport(), Duration::ZERO);

        assert_eq!(health().await.0.status, "ok");
        let Json(list) = features(State(state)).await;
        assert_eq!(list.features, vec!["dangling", "points"]);
    }

    #[tokio::test]
    async fn test_opendata_merges_and_caches() {
        let transport = transport();
        let (state, _dir) = state(transport.clone(), Duration::from_secs(60));

        let Json(first) = opendata(State(state.clone()), query(Some("points"))).await.unwrap();
        let Json(second) = opendata(State(state.clone()), query(Some("points"))).await.unwrap();

        assert_eq!(first.feature_count(), 1);
        assert_eq!(first, second);
        assert_eq!(transport.calls_to(BASE_CSV), 1);
        assert_eq!(state.cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_opendata_without_cache_refetches() {
        let transport = transport();
        let (state, _dir) = state(transport.clone(), Duration::ZERO);

        opendata(State(state.clone()), query(Some("points"))).await.unwrap();
        opendata(State(state), query(Some("points"))).await.unwrap();

        assert_eq!(transport.calls_to(BASE_CSV), 2);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let (state, _dir) = state(transport(), Duration::ZERO);

        let missing = opendata(State(state.clone()), query(None)).await.unwrap_err();
        assert_eq!(missing.into_response().status(), StatusCode::BAD_REQUEST);

        let unknown = opendata(State(state.clone()), query(Some("lakes"))).await.unwrap_err();
        assert_eq!(unknown.into_response().status(), StatusCode::NOT_FOUND);

        let failed = opendata(State(state), query(Some("dangling"))).await.unwrap_err();
        assert!(matches!(failed, ServerError::Merge(_)));
        assert_eq!(failed.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_opendata_urls() {
        let (state, _dir) = state(transport(), Duration::ZERO);

        let Json(urls) = opendata_urls(State(state), query(Some("points"))).await.unwrap();

        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].resources[0].url, BASE_CSV);
    }
}
