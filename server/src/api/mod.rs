use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tapgame_execution::Store;
use tapgame_types::api::INIT_DATA_HEADER;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{Backend, ServerConfig};

mod admin;
mod http;

pub use admin::ADMIN_TOKEN_HEADER;

pub struct Api<S: Store> {
    backend: Arc<Backend<S>>,
}

#[derive(Clone)]
struct OriginConfig {
    allowed_origins: Arc<HashSet<String>>,
    allow_any_origin: bool,
    allow_no_origin: bool,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn default_governor_config() -> Option<IpGovernorConfig> {
    GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .finish()
}

fn governor_config(config: &ServerConfig) -> Option<Arc<IpGovernorConfig>> {
    match (config.http_rate_limit_per_second, config.http_rate_limit_burst) {
        (Some(rate_per_second), Some(burst_size)) if rate_per_second > 0 && burst_size > 0 => {
            let nanos_per_request = (1_000_000_000u64 / rate_per_second).max(1);
            GovernorConfigBuilder::default()
                .period(Duration::from_nanos(nanos_per_request))
                .burst_size(burst_size)
                .key_extractor(SmartIpKeyExtractor)
                .finish()
                .or_else(|| {
                    tracing::warn!("invalid rate-limit config; falling back to defaults");
                    default_governor_config()
                })
                .map(Arc::new)
        }
        _ => None,
    }
}

impl<S: Store + 'static> Api<S> {
    pub fn new(backend: Arc<Backend<S>>) -> Self {
        Self { backend }
    }

    pub fn router(&self) -> Router {
        let config = self.backend.config();
        let allowed_origins: HashSet<String> = config.allowed_origins.iter().cloned().collect();
        let allow_any_origin = config.allows_any_origin();
        if allowed_origins.is_empty() && !config.allow_no_origin {
            tracing::warn!("no allowed origins configured; all browser origins will be rejected");
        }
        let cors_origins = allowed_origins
            .iter()
            .filter(|origin| *origin != "*")
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "invalid allowed origin");
                    None
                }
            })
            .collect::<Vec<_>>();
        let origin_config = OriginConfig {
            allowed_origins: Arc::new(allowed_origins),
            allow_any_origin,
            allow_no_origin: config.allow_no_origin,
        };

        let cors = if allow_any_origin {
            CorsLayer::new().allow_origin(AllowOrigin::any())
        } else {
            CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins))
        }
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(INIT_DATA_HEADER),
            header::HeaderName::from_static(ADMIN_TOKEN_HEADER),
            header::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([header::HeaderName::from_static("x-request-id")]);

        // Origin checks cover the API surface only; page loads and health checks carry no Origin.
        let guarded = Router::new()
            .route(
                "/api/user/:user_id",
                get(http::get_user::<S>).post(http::sync_user::<S>),
            )
            .route("/api/action/:user_id", post(http::action::<S>))
            .route("/api/leaderboard", get(http::leaderboard::<S>))
            .route("/admin/stats", get(admin::stats::<S>))
            .route("/admin/users", get(admin::list_users::<S>))
            .route("/admin/users/:user_id", get(admin::player_stats::<S>))
            .route("/admin/users/:user_id/grant", post(admin::grant::<S>))
            .route("/admin/users/:user_id/ban", post(admin::ban::<S>))
            .route("/admin/users/:user_id/reset", post(admin::reset::<S>))
            .route_layer(middleware::from_fn(move |req, next| {
                let origin_config = origin_config.clone();
                async move { enforce_origin(origin_config, req, next).await }
            }));

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .merge(guarded);

        let router = match &config.static_dir {
            Some(dir) => router.fallback_service(ServeDir::new(dir)),
            None => router,
        };

        let router = match governor_config(config) {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };

        let router = router.layer(cors);
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn(request_id_middleware));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.backend.clone())
    }
}

async fn enforce_origin(config: OriginConfig, req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if let Some(origin) = origin {
        if !config.allow_any_origin && !config.allowed_origins.contains(origin) {
            return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
        }
    } else if !config.allow_no_origin {
        return (StatusCode::FORBIDDEN, "Origin required").into_response();
    }
    next.run(req).await
}

async fn request_id_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}
