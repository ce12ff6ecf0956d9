//! Router configuration for the SpeedSqueak web backend.
//!
//! # Route Structure
//!
//! ```text
//! /api/generate-sas-url?blobName=...   - Signed blob URL (GET)
//! /api/events                          - Events from the warehouse (GET)
//! /*                                   - Static frontend files
//! ```
//!
//! # Example
//!
//! ```ignore
//! use speedsqueak_web::server::{create_router, RouterConfig};
//!
//! let config = RouterConfig::new("frontend/public")
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(signer, connection, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3333").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::path::PathBuf;
use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::handlers::{events_handler, sas_url_handler, AppState};
use crate::config::DEFAULT_STATIC_DIR;
use crate::storage::SasIssuer;
use crate::warehouse::Warehouse;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Directory served for every non-API path
    pub static_dir: PathBuf,

    /// Allowed CORS origins (None = no CORS layer)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Create a router configuration serving static files from `static_dir`.
    ///
    /// By default:
    /// - No CORS headers are sent
    /// - Tracing is enabled
    pub fn new(static_dir: impl Into<PathBuf>) -> Self {
        Self {
            static_dir: static_dir.into(),
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STATIC_DIR)
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// The two API routes are GET-only; any other method on them gets axum's
/// default 405. Every other path falls through to the static file service,
/// which answers 404 for missing files.
pub fn create_router<I, W>(issuer: I, warehouse: W, config: RouterConfig) -> Router
where
    I: SasIssuer,
    W: Warehouse,
{
    let app_state = AppState::new(issuer, warehouse);

    let api_routes = Router::new()
        .route("/generate-sas-url", get(sas_url_handler::<I, W>))
        .route("/events", get(events_handler::<I, W>))
        .with_state(app_state);

    let mut router = Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new(&config.static_dir));

    if let Some(cors) = build_cors_layer(&config) {
        router = router.layer(cors);
    }

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer, if any origins are configured.
fn build_cors_layer(config: &RouterConfig) -> Option<CorsLayer> {
    let origins = config.cors_origins.as_ref()?;

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400)); // 24 hours

    // Parse origins into HeaderValues, dropping anything malformed
    let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    Some(cors.allow_origin(parsed_origins))
}

// =============================================================================
// Tests
// =============================================================================
