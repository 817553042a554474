use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;

/// Key of the cached public leaderboard body.
pub const LEADERBOARD_KEY: &str = "leaderboard";

/// Best-effort Redis cache for rendered response bodies. Every failure is logged
/// and reported as a miss so callers fall through to the store.
pub struct RedisCache {
    client: redis::Client,
    connection: Mutex<Option<redis::aio::ConnectionManager>>,
    prefix: String,
    ttl: Duration,
}

impl RedisCache {
    pub fn new(url: &str, prefix: String, ttl: Duration) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            prefix,
            ttl,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    async fn ensure_connection(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<redis::aio::ConnectionManager>>, redis::RedisError>
    {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        Ok(guard)
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut guard = match self.ensure_connection().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!(error = %err, "redis cache connection failed");
                return None;
            }
        };
        let conn = guard.as_mut()?;
        let result: redis::RedisResult<Option<Vec<u8>>> = conn.get(self.key(key)).await;
        match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, key, "redis cache get failed");
                *guard = None;
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &[u8]) {
        let mut guard = match self.ensure_connection().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!(error = %err, "redis cache connection failed");
                return;
            }
        };
        let Some(conn) = guard.as_mut() else {
            return;
        };
        let result: redis::RedisResult<()> =
            conn.set_ex(self.key(key), value, self.ttl_secs()).await;
        if let Err(err) = result {
            tracing::warn!(error = %err, key, "redis cache set failed");
            *guard = None;
        }
    }

    /// Drops a cached body so the next read goes to the store.
    pub async fn invalidate(&self, key: &str) {
        let mut guard = match self.ensure_connection().await {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!(error = %err, "redis cache connection failed");
                return;
            }
        };
        let Some(conn) = guard.as_mut() else {
            return;
        };
        let result: redis::RedisResult<()> = conn.del(self.key(key)).await;
        if let Err(err) = result {
            tracing::warn!(error = %err, key, "redis cache invalidate failed");
            *guard = None;
        }
    }
}
