use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use streamprobe_core::config::TargetsSection;
use streamprobe_core::discovery::{CategorizedResult, StreamDiscovery};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use url::Url;

const MISSING_URL: &str = "url query parameter required";
const INVALID_URL: &str = "url query parameter must be an absolute http(s) URL";
const INVALID_WAIT: &str = "wait query parameter must be a whole number of milliseconds";
const EXTRACTION_FAILED: &str = "Failed to extract stream";

#[derive(Clone)]
pub struct AppState {
    discovery: StreamDiscovery,
    targets: Arc<TargetsSection>,
}

impl AppState {
    pub fn new(discovery: StreamDiscovery, targets: TargetsSection) -> Self {
        Self {
            discovery,
            targets: Arc::new(targets),
        }
    }
}

pub fn router(state: AppState, cors_allow_any: bool) -> Router {
    let router = Router::new()
        .route("/api/movie/:id", get(movie))
        .route("/api/tv/:id/:season/:episode", get(tv))
        .route("/api/extract", get(extract))
        .route("/health", get(health))
        .with_state(state);

    if cors_allow_any {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE]),
        )
    } else {
        router
    }
}

/// Serves until Ctrl-C or SIGTERM, then tears the browser pool down.
pub async fn serve(
    state: AppState,
    bind: &str,
    port: u16,
    cors_allow_any: bool,
) -> std::io::Result<()> {
    let address = format!("{bind}:{port}");
    let listener = TcpListener::bind(&address).await?;
    info!(address = %address, "stream discovery API listening");

    let discovery = state.discovery.clone();
    axum::serve(listener, router(state, cors_allow_any))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped; closing browser pool");
    discovery.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

/// Parses a discovery target; only absolute http(s) URLs are accepted.
pub fn parse_target(raw: &str) -> Option<Url> {
    Url::parse(raw.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
}

/// Mirrors a lenient numeric coercion: integers stay integers, other finite
/// numbers pass through, anything else is `null`.
fn coerce_number(raw: &str) -> Option<serde_json::Number> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .map(serde_json::Number::from)
        .ok()
        .or_else(|| raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64))
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TitleRequest {
    Movie {
        #[serde(rename = "imdbId")]
        imdb_id: String,
    },
    Tv {
        #[serde(rename = "imdbId")]
        imdb_id: String,
        season: Option<serde_json::Number>,
        episode: Option<serde_json::Number>,
    },
}

/// Fields identifying what was asked for, echoed into the response.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RequestIdentity {
    Title(TitleRequest),
    Page { url: String },
}

#[derive(Debug, Serialize)]
pub struct StreamBuckets {
    pub m3u8: Vec<String>,
    pub mp4: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponse {
    pub success: bool,
    #[serde(flatten)]
    pub request: RequestIdentity,
    pub stream: Option<String>,
    pub streams: StreamBuckets,
    pub subtitles: Vec<String>,
    pub all_urls: Vec<String>,
}

impl StreamResponse {
    pub fn new(request: RequestIdentity, result: CategorizedResult) -> Self {
        Self {
            success: true,
            request,
            stream: result.primary,
            streams: StreamBuckets {
                m3u8: result.manifests,
                mp4: result.direct_files,
            },
            subtitles: result.subtitles,
            all_urls: result.all_urls,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    fn bad_request(message: &str) -> Response {
        let body = Self {
            success: false,
            error: message.to_string(),
            details: None,
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct ExtractQuery {
    url: Option<String>,
    wait: Option<String>,
}

async fn discover(
    state: &AppState,
    target: &str,
    wait: Option<Duration>,
    request: RequestIdentity,
) -> Response {
    match state.discovery.discover(target, wait).await {
        Ok(outcome) => Json(StreamResponse::new(request, outcome.result)).into_response(),
        Err(err) => {
            error!(target = %target, error = %err, "stream extraction failed");
            let body = ErrorResponse {
                success: false,
                error: EXTRACTION_FAILED.to_string(),
                details: Some(err.to_string()),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn movie(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let target = state.targets.movie_url(&id);
    let request = RequestIdentity::Title(TitleRequest::Movie { imdb_id: id });
    discover(&state, &target, None, request).await
}

async fn tv(
    State(state): State<AppState>,
    Path((id, season, episode)): Path<(String, String, String)>,
) -> Response {
    let target = state.targets.tv_url(&id, &season, &episode);
    let request = RequestIdentity::Title(TitleRequest::Tv {
        imdb_id: id,
        season: coerce_number(&season),
        episode: coerce_number(&episode),
    });
    discover(&state, &target, None, request).await
}

async fn extract(State(state): State<AppState>, Query(query): Query<ExtractQuery>) -> Response {
    let Some(raw) = query.url.filter(|url| !url.trim().is_empty()) else {
        return ErrorResponse::bad_request(MISSING_URL);
    };
    let Some(target) = parse_target(&raw) else {
        return ErrorResponse::bad_request(INVALID_URL);
    };
    let wait = match query.wait.as_deref().map(str::parse::<u64>) {
        None => None,
        Some(Ok(ms)) => Some(Duration::from_millis(ms)),
        Some(Err(_)) => return ErrorResponse::bad_request(INVALID_WAIT),
    };
    discover(&state, target.as_str(), wait, RequestIdentity::Page { url: raw }).await
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use streamprobe_core::browser::{
        BrowserBackend, BrowserError, BrowserInstance, BrowserPool, BrowserResult, InterceptPolicy,
        PageTab, TrafficEvent,
    };
    use streamprobe_core::config::{DiscoverySection, PoolSection};
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use tower::ServiceExt;

    use super::*;

    struct StubBackend {
        launches: Arc<AtomicUsize>,
        fail: bool,
        traffic: Vec<TrafficEvent>,
    }

    struct StubBrowser {
        traffic: Vec<TrafficEvent>,
    }

    struct StubTab {
        traffic: Vec<TrafficEvent>,
    }

    #[async_trait]
    impl BrowserBackend for StubBackend {
        async fn launch(&self) -> BrowserResult<Arc<dyn BrowserInstance>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BrowserError::Launch("chromium exited with status 127".into()));
            }
            Ok(Arc::new(StubBrowser {
                traffic: self.traffic.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserInstance for StubBrowser {
        async fn probe(&self) -> BrowserResult<()> {
            Ok(())
        }

        async fn open_tab(&self) -> BrowserResult<Box<dyn PageTab>> {
            Ok(Box::new(StubTab {
                traffic: self.traffic.clone(),
            }))
        }

        async fn close(&self) -> BrowserResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl PageTab for StubTab {
        async fn observe(
            &self,
            _policy: &InterceptPolicy,
        ) -> BrowserResult<UnboundedReceiver<TrafficEvent>> {
            let (tx, rx) = mpsc::unbounded_channel();
            for event in self.traffic.iter().cloned() {
                let _ = tx.send(event);
            }
            Ok(rx)
        }

        async fn navigate(&self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }

        async fn evaluate(&self, _expression: &str) -> BrowserResult<Value> {
            Ok(json!({}))
        }

        async fn fetch_text(&self, _url: &str) -> BrowserResult<Option<String>> {
            Ok(None)
        }

        async fn close(self: Box<Self>) -> BrowserResult<()> {
            Ok(())
        }
    }

    fn app(fail: bool, traffic: Vec<TrafficEvent>) -> (Router, Arc<AtomicUsize>) {
        let launches = Arc::new(AtomicUsize::new(0));
        let backend = StubBackend {
            launches: Arc::clone(&launches),
            fail,
            traffic,
        };
        let pool = BrowserPool::new(Arc::new(backend), PoolSection::default());
        let discovery = DiscoverySection {
            settle_delay_ms: 0,
            ..DiscoverySection::default()
        };
        let state = AppState::new(
            StreamDiscovery::new(pool, &discovery),
            TargetsSection::default(),
        );
        (router(state, true), launches)
    }

    fn request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app.oneshot(request(uri)).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn manifest_request() -> Vec<TrafficEvent> {
        vec![TrafficEvent::Request {
            url: "https://cdn.example/v/master.m3u8".into(),
            resource_type: None,
        }]
    }

    #[tokio::test]
    async fn extract_without_url_never_touches_the_pool() {
        let (app, launches) = app(false, Vec::new());
        let (status, body) = send(app, "/api/extract").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({ "success": false, "error": "url query parameter required" })
        );
        assert_eq!(launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn extract_rejects_relative_and_non_http_urls() {
        for uri in ["/api/extract?url=%2Fwatch", "/api/extract?url=ftp%3A%2F%2Fa.example%2Fx"] {
            let (app, launches) = app(false, Vec::new());
            let (status, body) = send(app, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], INVALID_URL);
            assert_eq!(launches.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn extract_reports_categorized_streams() {
        let (app, _) = app(false, manifest_request());
        let (status, body) =
            send(app, "/api/extract?url=https%3A%2F%2Fsite.example%2Fembed%2F1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["url"], "https://site.example/embed/1");
        assert_eq!(body["stream"], "https://cdn.example/v/master.m3u8");
        assert_eq!(body["streams"]["m3u8"], json!(["https://cdn.example/v/master.m3u8"]));
        assert_eq!(body["streams"]["mp4"], json!([]));
        assert_eq!(body["allUrls"], json!(["https://cdn.example/v/master.m3u8"]));
    }

    #[tokio::test]
    async fn movie_route_echoes_identity() {
        let (app, _) = app(false, manifest_request());
        let (status, body) = send(app, "/api/movie/tt0111161").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "movie");
        assert_eq!(body["imdbId"], "tt0111161");
        assert_eq!(body["subtitles"], json!([]));
    }

    #[tokio::test]
    async fn tv_route_coerces_season_and_episode() {
        let (app, _) = app(false, Vec::new());
        let (status, body) = send(app, "/api/tv/tt0903747/02/finale").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "tv");
        assert_eq!(body["season"], 2);
        assert_eq!(body["episode"], Value::Null);
        assert_eq!(body["stream"], Value::Null);
    }

    #[tokio::test]
    async fn launch_failure_maps_to_500() {
        let (app, launches) = app(true, Vec::new());
        let (status, body) = send(app, "/api/movie/tt1").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], EXTRACTION_FAILED);
        assert!(body["details"].as_str().unwrap().contains("status 127"));
        assert_eq!(launches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn health_reports_timestamp() {
        let (app, _) = app(false, Vec::new());
        let (status, body) = send(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        let timestamp = body["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn coercion_follows_numeric_rules() {
        assert_eq!(coerce_number("3"), Some(serde_json::Number::from(3)));
        assert_eq!(coerce_number("1.5"), serde_json::Number::from_f64(1.5));
        assert_eq!(coerce_number("NaN"), None);
        assert_eq!(coerce_number("s01"), None);
    }
}
