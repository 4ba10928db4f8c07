//! # quadfs HTTP API
//!
//! ## Endpoints
//!
//! - `OPTIONS|GET|HEAD|PUT|DELETE|MKCOL|PROPFIND|COPY|MOVE /dav/{*path}` -
//!   filesystem verbs
//! - `POST /query` - read-only query over the caller's readable quads
//! - `GET /permissions?resource=` / `PUT /permissions` - inspect or change grants
//! - `GET /status` - store summary
//! - `GET /log/{index}` - one committed transaction (admins only)
//! - `GET /health` - health check
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `QUADFS_CORS_ORIGINS`: comma-separated allowed origins, or "*" for all (default: localhost only)
//! - `QUADFS_RATE_LIMIT`: requests per second (default: 100, 0 to disable)
//! - `QUADFS_API_KEY`: if set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{get_api_key_from_env, keys_match};
pub use handlers::{
    COMMIT_MESSAGE_HEADER, DAV_PREFIX, USER_AUTHORITIES_HEADER, USER_ID_HEADER, USER_NAME_HEADER,
};
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    ErrorResponse, GrantJson, HealthResponse, LogEntryResponse, MultiStatusResponse,
    PermissionsResponse, QueryRequest, SetPermissionRequest, SetPermissionResponse,
};

use crate::config::{Config, DEFAULT_MAX_BODY_BYTES};
use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{any, get, post},
};
use quadfs_core::{PermissionEvent, PermissionListener, QuadFsError, Store};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state. The store synchronises internally.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    /// User ids resolved as organisation-wide administrators.
    pub admins: Arc<BTreeSet<String>>,
    pub max_body_bytes: usize,
}

impl AppState {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(store),
            admins: Arc::new(BTreeSet::new()),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    #[must_use]
    pub fn with_admins(mut self, admins: impl IntoIterator<Item = String>) -> Self {
        self.admins = Arc::new(admins.into_iter().collect());
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }
}

// =============================================================================
// PERMISSION EVENTS
// =============================================================================

/// Writes every grant change to the log.
#[derive(Debug, Default)]
pub struct TracingPermissionListener;

impl PermissionListener for TracingPermissionListener {
    fn on_permission_change(&self, event: &PermissionEvent) {
        tracing::info!(
            event = "permission_change",
            subject = %event.subject,
            resource = %event.resource,
            old_level = %event.old_level,
            new_level = %event.new_level,
            acting_user = event.acting_user.as_deref().unwrap_or("system"),
            "permission changed"
        );
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

fn dav_methods() -> Vec<Method> {
    let mut methods = vec![
        Method::GET,
        Method::HEAD,
        Method::PUT,
        Method::POST,
        Method::DELETE,
        Method::OPTIONS,
    ];
    methods.extend(
        ["MKCOL", "PROPFIND", "COPY", "MOVE"]
            .iter()
            .filter_map(|m| Method::from_bytes(m.as_bytes()).ok()),
    );
    methods
}

fn allowed_headers() -> Vec<HeaderName> {
    let mut headers = vec![
        header::CONTENT_TYPE,
        header::AUTHORIZATION,
        header::RANGE,
    ];
    headers.extend(
        [
            USER_ID_HEADER,
            USER_NAME_HEADER,
            USER_AUTHORITIES_HEADER,
            COMMIT_MESSAGE_HEADER,
            "destination",
            "overwrite",
            "depth",
        ]
        .iter()
        .filter_map(|h| HeaderName::from_bytes(h.as_bytes()).ok()),
    );
    headers
}

/// CORS from `QUADFS_CORS_ORIGINS`: "*" allows everything, a list allows
/// those origins, unset means localhost only.
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("QUADFS_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (QUADFS_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in QUADFS_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods(dav_methods())
                    .allow_headers(allowed_headers())
            }
        }
        None => {
            tracing::info!("CORS: No QUADFS_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(dav_methods())
        .allow_headers(allowed_headers())
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. CORS
/// 3. Body limit
/// 4. Rate limiting (if enabled)
/// 5. Authentication (if configured)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set QUADFS_API_KEY to enable authentication."
        );
    }

    let max_body_bytes = state.max_body_bytes;
    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/log/{index}", get(handlers::log_handler))
        .route("/query", post(handlers::query_handler))
        .route(
            "/permissions",
            get(handlers::get_permissions_handler).put(handlers::put_permissions_handler),
        )
        .route(DAV_PREFIX, any(handlers::dav_root_handler))
        .route("/dav/", any(handlers::dav_root_handler))
        .route("/dav/{*path}", any(handlers::dav_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Serve `store` on the configured address until Ctrl+C.
pub async fn run_server(config: &Config, store: Store) -> Result<(), QuadFsError> {
    store
        .permissions()
        .subscribe(Arc::new(TracingPermissionListener));

    let state = AppState::new(store)
        .with_admins(config.admins.iter().cloned())
        .with_max_body_bytes(config.max_body_bytes);
    let router = create_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| QuadFsError::io("bind", e))?;

    tracing::info!("quadfs HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| QuadFsError::io("serve", e))
}
