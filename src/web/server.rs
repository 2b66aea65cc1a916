use std::sync::Arc;
use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::WebConfig;
use crate::metrics::render_metrics;
use crate::trends::engine::HotTrendsEngine;

/// HTTP query/refresh API for CLI and other callers
pub struct WebServer {
    engine: Arc<HotTrendsEngine>,
    config: WebConfig,
}

#[derive(Clone)]
struct AppState {
    engine: Arc<HotTrendsEngine>,
}

impl WebServer {
    pub fn new(engine: Arc<HotTrendsEngine>, config: &WebConfig) -> Self {
        Self {
            engine,
            config: config.clone(),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        if !self.config.enabled {
            info!("Web API disabled");
            return Ok(());
        }

        let app = router(self.engine.clone());
        let addr = format!("{}:{}", self.config.address, self.config.port);
        info!("Web API listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let engine = self.engine.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { engine.stopped().await })
            .await?;
        Ok(())
    }
}

pub fn router(engine: Arc<HotTrendsEngine>) -> Router {
    Router::new()
        .route("/api/stats", get(api_stats))
        .route("/api/sources", get(api_sources))
        .route("/api/trends/:key", get(api_trends))
        .route("/api/refresh", post(api_refresh_all))
        .route("/api/refresh/:key", post(api_refresh_one))
        .route("/api/cache", delete(api_clear_cache))
        .route("/metrics", get(api_metrics))
        .layer(CorsLayer::permissive())
        .with_state(AppState { engine })
}

fn unknown_source(key: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("unknown source '{}'", key) })),
    )
        .into_response()
}

/// Stats API
async fn api_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.engine.get_stats())
}

/// Source listing with per-source cache state
async fn api_sources(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "sources": state.engine.source_statuses() }))
}

/// Cached list for one source; never triggers a fetch
async fn api_trends(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if !state.engine.registry().contains(&key) {
        return unknown_source(&key);
    }
    Json(serde_json::json!({
        "source": key,
        "loading": state.engine.is_loading(&key),
        "last_update": state.engine.last_update(&key),
        "stale": state.engine.should_refresh(&key),
        "list": state.engine.get(&key),
    }))
    .into_response()
}

async fn api_refresh_all(State(state): State<AppState>) -> StatusCode {
    state.engine.refresh_all();
    StatusCode::ACCEPTED
}

async fn api_refresh_one(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if !state.engine.registry().contains(&key) {
        return unknown_source(&key);
    }
    state.engine.refresh_one(&key);
    StatusCode::ACCEPTED.into_response()
}

async fn api_clear_cache(State(state): State<AppState>) -> StatusCode {
    state.engine.clear_cache();
    StatusCode::NO_CONTENT
}

async fn api_metrics(State(state): State<AppState>) -> String {
    render_metrics(&state.engine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::config::{EngineConfig, SchedulerConfig};
    use crate::coordinator::tests::{Behavior, StubProvider};
    use crate::storage::MemoryStore;
    use crate::trends::source::SourceRegistry;

    async fn serve() -> (String, Arc<HotTrendsEngine>) {
        let engine = Arc::new(HotTrendsEngine::with_registry(
            SourceRegistry::from_keys(["weibo", "zhihu"]),
            &EngineConfig::default(),
            &SchedulerConfig::default(),
            Arc::new(StubProvider::new(Behavior::Succeed { items: 2 }, Duration::ZERO)),
            Arc::new(MemoryStore::new()),
            None,
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(engine.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), engine)
    }

    #[tokio::test]
    async fn test_trends_endpoint() {
        let (base, engine) = serve().await;
        engine.refresh_one("weibo").await.unwrap();

        let body: serde_json::Value = reqwest::get(format!("{}/api/trends/weibo", base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["source"], "weibo");
        assert_eq!(body["stale"], false);
        assert_eq!(body["list"]["items"].as_array().unwrap().len(), 2);
        assert_eq!(body["list"]["items"][0]["rank"], 1);

        let missing = reqwest::get(format!("{}/api/trends/nope", base)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_refresh_and_clear_endpoints() {
        let (base, engine) = serve().await;
        let client = reqwest::Client::new();

        let resp = client.post(format!("{}/api/refresh/zhihu", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
        for _ in 0..50 {
            if engine.get("zhihu").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(engine.get("zhihu").is_some());

        let resp = client.post(format!("{}/api/refresh/nope", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        let resp = client.delete(format!("{}/api/cache", base)).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
        assert!(engine.get("zhihu").is_none());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let (base, engine) = serve().await;
        engine.refresh_all().await.unwrap();

        let text = reqwest::get(format!("{}/metrics", base)).await.unwrap().text().await.unwrap();
        assert!(text.contains("hot_trends_refreshes_total{outcome=\"succeeded\"} 2"));
        assert!(text.contains("hot_trends_source_items{source=\"weibo\"} 2"));
    }
}
