use serde::Serialize;
use std::path::PathBuf;
use tapgame_execution::auth::DEFAULT_MAX_AGE_SECS;

pub const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 50;
pub const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 100;
pub const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 64 * 1024;
pub const DEFAULT_CACHE_REDIS_PREFIX: &str = "tapgame:";
pub const DEFAULT_CACHE_REDIS_TTL_SECONDS: u64 = 5;
pub const DEFAULT_NOTICE_BUFFER: usize = 1_024;

/// Runtime settings of the HTTP backend. Secrets (bot token, admin token) are
/// passed separately so this struct can be logged as-is.
#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    /// Maximum accepted credential age.
    pub auth_max_age_secs: u64,
    /// Browser origins allowed to call the API; `*` admits any origin.
    pub allowed_origins: Vec<String>,
    /// Admit requests without an `Origin` header (native clients, curl).
    pub allow_no_origin: bool,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    pub cache_redis_url: Option<String>,
    pub cache_redis_prefix: Option<String>,
    pub cache_redis_ttl_seconds: Option<u64>,
    /// Deliver player notices through the chat bot API instead of the log.
    pub notify_chat: bool,
    pub notice_buffer: usize,
    /// Directory of mini-app files served for unmatched paths.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth_max_age_secs: DEFAULT_MAX_AGE_SECS,
            allowed_origins: Vec::new(),
            allow_no_origin: false,
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            cache_redis_url: None,
            cache_redis_prefix: Some(DEFAULT_CACHE_REDIS_PREFIX.to_string()),
            cache_redis_ttl_seconds: Some(DEFAULT_CACHE_REDIS_TTL_SECONDS),
            notify_chat: false,
            notice_buffer: DEFAULT_NOTICE_BUFFER,
            static_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|origin| origin == "*")
    }

    pub fn notice_capacity(&self) -> usize {
        self.notice_buffer.max(1)
    }
}

/// Splits a comma separated origin list, dropping blanks.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}
