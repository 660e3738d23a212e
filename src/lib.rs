use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod auth;
pub mod gallery;
pub mod storage;

pub use gallery::ResizePreset;
use storage::StorageConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub gallery: GalleryConfig,
    pub storage: StorageSetConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GalleryConfig {
    pub secret_key: String,
    /// Named derivative shapes clients may request.
    #[serde(default = "default_presets")]
    pub presets: HashMap<String, ResizePreset>,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    /// Photos sampled per album on the index page.
    #[serde(default = "default_preview_count")]
    pub preview_count: usize,
    /// Export archives older than this are purged; `None` keeps them forever.
    #[serde(default)]
    pub archive_expiry_days: Option<u64>,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ScannerConfig {
    pub patterns: Vec<PatternConfig>,
    #[serde(default)]
    pub ignores: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternConfig {
    pub category: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageSetConfig {
    pub photo: StorageConfig,
    pub cache: StorageConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub groups: Vec<String>,
    /// Blanket capability: sees every album and photo.
    #[serde(default)]
    pub view_all: bool,
}

fn default_presets() -> HashMap<String, ResizePreset> {
    HashMap::from([
        (
            "thumb".to_string(),
            ResizePreset {
                width: 128,
                height: 128,
                crop: true,
            },
        ),
        (
            "standard".to_string(),
            ResizePreset {
                width: 768,
                height: 768,
                crop: false,
            },
        ),
    ])
}

fn default_jpeg_quality() -> u8 {
    85
}

fn default_preview_count() -> usize {
    5
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            secret_key: "change-me-in-production".to_string(),
            presets: default_presets(),
            jpeg_quality: default_jpeg_quality(),
            preview_count: default_preview_count(),
            archive_expiry_days: Some(60),
            scanner: ScannerConfig {
                patterns: vec![PatternConfig {
                    category: "Photos".to_string(),
                    pattern: r"(?P<a_year>\d{4})_(?P<a_month>\d{2})_(?P<a_day>\d{2})_(?P<a_name>[^/]+)/[^/]+\.(jpg|JPG|jpeg|JPEG|png|PNG)$"
                        .to_string(),
                }],
                ignores: vec![r"\.DS_Store$".to_string(), r"(^|/)\.".to_string()],
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            gallery: GalleryConfig::default(),
            storage: StorageSetConfig {
                photo: StorageConfig::filesystem("photos"),
                cache: StorageConfig::filesystem("cache"),
            },
            users: Vec::new(),
        }
    }
}

use axum::{Router, http::HeaderMap, routing::get, routing::post};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub gallery: gallery::SharedGallery,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn viewer(&self, headers: &HeaderMap) -> gallery::Viewer {
        auth::resolve_viewer(headers, &self.config)
    }
}

/// Build the router and its gallery from configuration. The gallery handle
/// is returned alongside so callers can save the catalog on shutdown.
pub fn create_app(config: Config) -> Result<(Router, gallery::SharedGallery), gallery::GalleryError> {
    let storage = storage::StorageSet::from_config(&config.storage.photo, &config.storage.cache);
    let gallery: gallery::SharedGallery =
        Arc::new(gallery::Gallery::new(config.gallery.clone(), storage)?);
    let app_state = AppState {
        gallery: gallery.clone(),
        config: Arc::new(config),
    };
    Ok((router(app_state), gallery))
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(gallery::index_handler))
        .route("/latest", get(gallery::latest_handler))
        .route("/albums/{id}", get(gallery::album_handler))
        .route("/albums/{id}/export", get(gallery::album_export_handler))
        .route("/photos/{id}", get(gallery::photo_handler))
        .route("/photos/{id}/{size}", get(gallery::photo_image_handler))
        .route("/api/login", post(auth::login_handler))
        .route("/api/verify", get(auth::verify_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let method = request.method();
                    let uri = request.uri();
                    let matched_path = request
                        .extensions()
                        .get::<axum::extract::MatchedPath>()
                        .map(|matched_path| matched_path.as_str());

                    tracing::info_span!(
                        "http_request",
                        method = %method,
                        uri = %uri,
                        matched_path,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    let method = request.method();
                    let uri = request.uri();
                    let headers = request.headers();
                    let user_agent = headers
                        .get("user-agent")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");
                    let referer = headers
                        .get("referer")
                        .and_then(|h| h.to_str().ok())
                        .unwrap_or("-");

                    tracing::info!(
                        target: "access_log",
                        method = %method,
                        path = %uri.path(),
                        query = ?uri.query(),
                        user_agent = %user_agent,
                        referer = %referer,
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        let status = response.status();
                        let size = response
                            .headers()
                            .get("content-length")
                            .and_then(|h| h.to_str().ok())
                            .unwrap_or("-");

                        tracing::info!(
                            target: "access_log",
                            status = %status,
                            size = %size,
                            latency_ms = %latency.as_millis(),
                            "response"
                        );
                    },
                ),
        )
        .with_state(app_state)
}
