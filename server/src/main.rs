use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tapgame_execution::{CredentialVerifier, Layer, Memory, Store};
use tapgame_server::cache::RedisCache;
use tapgame_server::config::{parse_origins, ServerConfig};
use tapgame_server::notify::{BotApiNotifier, LogNotifier, NoticeQueue, Notifier};
use tapgame_server::persistence::{PostgresStore, SqliteStore};
use tapgame_server::{Api, Backend};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer as _};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_tracing() -> Result<()> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .ok()
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            (!trimmed.is_empty()).then_some(trimmed)
        });

    if let Some(endpoint) = endpoint {
        let service_name =
            std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "tapgame-server".to_string());
        let rate = std::env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value.clamp(0.0, 1.0))
            .unwrap_or(1.0);
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .build()
            .context("failed to build OTLP exporter")?;
        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(rate))
            .with_resource(
                opentelemetry_sdk::Resource::builder_empty()
                    .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
                    .build(),
            )
            .with_batch_exporter(exporter)
            .build();
        let tracer = tracer_provider.tracer("tapgame-server");
        opentelemetry::global::set_tracer_provider(tracer_provider);

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter()))
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter()).init();
    }

    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    /// Process-local rows, lost on exit.
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: IpAddr,

    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Chat bot token; keys credential verification and notice delivery.
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: String,

    /// Player store backend.
    #[arg(long, value_enum, default_value_t = StoreKind::Sqlite)]
    store: StoreKind,

    /// SQLite database file (sqlite store).
    #[arg(long, env = "SQLITE_PATH", default_value = "tapgame.db")]
    sqlite_path: PathBuf,

    /// Postgres connection string (postgres store).
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Operator token for /admin routes (admin access disabled when unset).
    #[arg(long, env = "ADMIN_AUTH_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Comma separated browser origins; `*` allows any.
    #[arg(long, env = "ALLOWED_HTTP_ORIGINS")]
    allowed_origins: Option<String>,

    /// Accept requests that carry no Origin header.
    #[arg(long, env = "ALLOW_HTTP_NO_ORIGIN")]
    allow_no_origin: bool,

    /// Maximum credential age in seconds (0 uses default).
    #[arg(long, env = "AUTH_MAX_AGE_SECS")]
    auth_max_age_secs: Option<u64>,

    /// HTTP rate limit per IP in requests per second (0 disables rate limiting).
    #[arg(long, env = "RATE_LIMIT_HTTP_PER_SEC")]
    http_rate_limit_per_second: Option<u64>,

    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long, env = "RATE_LIMIT_HTTP_BURST")]
    http_rate_limit_burst: Option<u32>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,

    /// Redis URL for leaderboard caching.
    #[arg(long)]
    cache_redis_url: Option<String>,

    /// Redis key prefix for leaderboard caching.
    #[arg(long)]
    cache_redis_prefix: Option<String>,

    /// Redis cache TTL in seconds (0 disables).
    #[arg(long)]
    cache_redis_ttl_seconds: Option<u64>,

    /// Directory of mini-app files served for unmatched paths.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Deliver player notices through the chat bot API.
    #[arg(long, env = "NOTIFY_CHAT")]
    notify_chat: bool,

    /// Max queued player notices (0 uses default).
    #[arg(long)]
    notice_buffer: Option<usize>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    if args.store == StoreKind::Postgres && args.database_url.is_none() {
        anyhow::bail!("--database-url (DATABASE_URL) is required for the postgres store");
    }
    if args.bot_token.trim().is_empty() {
        anyhow::bail!("bot token must not be empty");
    }

    Ok(ServerConfig {
        auth_max_age_secs: match args.auth_max_age_secs {
            Some(0) | None => defaults.auth_max_age_secs,
            Some(secs) => secs,
        },
        allowed_origins: args
            .allowed_origins
            .as_deref()
            .map(parse_origins)
            .unwrap_or_default(),
        allow_no_origin: args.allow_no_origin,
        http_rate_limit_per_second: map_optional_limit(
            args.http_rate_limit_per_second,
            defaults.http_rate_limit_per_second,
        ),
        http_rate_limit_burst: map_optional_limit(
            args.http_rate_limit_burst,
            defaults.http_rate_limit_burst,
        ),
        http_body_limit_bytes: map_optional_limit(
            args.http_body_limit_bytes,
            defaults.http_body_limit_bytes,
        ),
        cache_redis_url: args.cache_redis_url.clone(),
        cache_redis_prefix: args
            .cache_redis_prefix
            .clone()
            .or_else(|| defaults.cache_redis_prefix.clone()),
        cache_redis_ttl_seconds: map_optional_limit(
            args.cache_redis_ttl_seconds,
            defaults.cache_redis_ttl_seconds,
        ),
        notify_chat: args.notify_chat,
        notice_buffer: match args.notice_buffer {
            Some(0) | None => defaults.notice_buffer,
            Some(buffer) => buffer,
        },
        static_dir: args.static_dir.clone(),
    })
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

fn require_positive_u64(var: &str) -> Result<()> {
    let value = require_env(var)?;
    let parsed: u64 = value
        .parse()
        .with_context(|| format!("Invalid {var}: {value}"))?;
    if parsed == 0 {
        anyhow::bail!("Invalid {var}: {value}");
    }
    Ok(())
}

fn ensure_production_env() -> Result<()> {
    if !is_production() {
        return Ok(());
    }

    require_env("ALLOWED_HTTP_ORIGINS")?;
    require_env("ADMIN_AUTH_TOKEN")?;
    require_positive_u64("RATE_LIMIT_HTTP_PER_SEC")?;
    require_positive_u64("RATE_LIMIT_HTTP_BURST")?;

    Ok(())
}

async fn serve<S: Store + 'static>(store: S, args: &Args, config: ServerConfig) -> Result<()> {
    let notifier: Arc<dyn Notifier> = if config.notify_chat {
        Arc::new(BotApiNotifier::new(&args.bot_token))
    } else {
        Arc::new(LogNotifier)
    };
    let notices = NoticeQueue::spawn(notifier, config.notice_capacity());
    let verifier = CredentialVerifier::new(&args.bot_token, config.auth_max_age_secs);

    let mut backend = Backend::new(Layer::new(store), verifier, config.clone(), notices)
        .with_admin_token(args.admin_token.clone());
    if args.admin_token.is_none() {
        warn!("ADMIN_AUTH_TOKEN is unset; admin routes are disabled");
    }
    if let (Some(url), Some(ttl)) = (
        config.cache_redis_url.as_deref(),
        config.cache_redis_ttl_seconds,
    ) {
        let prefix = config.cache_redis_prefix.clone().unwrap_or_default();
        match RedisCache::new(url, prefix, Duration::from_secs(ttl)) {
            Ok(cache) => {
                info!(ttl_seconds = ttl, "leaderboard cache enabled");
                backend = backend.with_cache(cache);
            }
            Err(err) => warn!(error = %err, "invalid redis url; leaderboard cache disabled"),
        }
    }

    let app = Api::new(Arc::new(backend)).router();
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing()?;

    ensure_production_env()?;

    let config = build_config(&args)?;
    info!(
        store = ?args.store,
        config = %serde_json::to_string(&config).unwrap_or_default(),
        "starting tap game server"
    );

    match args.store {
        StoreKind::Memory => {
            warn!("memory store selected; progress is lost on exit");
            serve(Memory::default(), &args, config).await
        }
        StoreKind::Sqlite => {
            let path = args.sqlite_path.clone();
            let store = tokio::task::spawn_blocking(move || SqliteStore::open(&path))
                .await
                .context("sqlite open task failed")??;
            info!(path = %args.sqlite_path.display(), "sqlite store ready");
            serve(store, &args, config).await
        }
        StoreKind::Postgres => {
            let url = args
                .database_url
                .clone()
                .context("DATABASE_URL is required for the postgres store")?;
            let store = tokio::task::spawn_blocking(move || PostgresStore::connect(&url))
                .await
                .context("postgres connect task failed")??;
            info!("postgres store ready");
            serve(store, &args, config).await
        }
    }
}
