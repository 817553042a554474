//! HTTP backend for the tap game.
//!
//! [`Backend`] owns the transaction coordinator and the collaborators around it
//! (credential verifier, leaderboard cache, notice queue); [`Api`] exposes it over
//! axum. Store work runs on blocking threads so a dropped connection never
//! interrupts a transaction halfway.

use axum::http::HeaderMap;
use std::sync::Arc;
use tapgame_execution::{now_ms, CredentialVerifier, Error, Layer, Store};
use tapgame_types::api::{INIT_DATA_HEADER, LEADERBOARD_LIMIT};
use tapgame_types::Identity;
use tracing::debug;

mod api;
pub mod cache;
pub mod config;
pub mod notify;
pub mod persistence;

pub use api::{Api, ADMIN_TOKEN_HEADER};
pub use config::ServerConfig;

use cache::{RedisCache, LEADERBOARD_KEY};
use notify::{Notice, NoticeQueue};

pub struct Backend<S: Store> {
    config: ServerConfig,
    layer: Layer<S>,
    verifier: CredentialVerifier,
    admin_token: Option<String>,
    cache: Option<RedisCache>,
    notices: NoticeQueue,
}

impl<S: Store + 'static> Backend<S> {
    pub fn new(
        layer: Layer<S>,
        verifier: CredentialVerifier,
        config: ServerConfig,
        notices: NoticeQueue,
    ) -> Self {
        Self {
            config,
            layer,
            verifier,
            admin_token: None,
            cache: None,
            notices,
        }
    }

    /// Enables the administrative endpoints. A blank token keeps them closed.
    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.filter(|token| !token.trim().is_empty());
        self
    }

    pub fn with_cache(mut self, cache: RedisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn layer(&self) -> &Layer<S> {
        &self.layer
    }

    pub(crate) fn admin_token(&self) -> Option<&str> {
        self.admin_token.as_deref()
    }

    /// Verifies the launch credential carried by `headers`.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, Error> {
        let raw = headers
            .get(INIT_DATA_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        self.verifier
            .verify(raw, now_ms() / 1_000)
            .map_err(|err| {
                debug!(error = %err, "credential rejected");
                Error::from(err)
            })
    }

    /// Authenticates and requires the credential to belong to `user_id`.
    pub fn authorize(&self, headers: &HeaderMap, user_id: &str) -> Result<Identity, Error> {
        let identity = self.authenticate(headers)?;
        if identity.id != user_id {
            debug!(credential = %identity.id, requested = user_id, "identity mismatch");
            return Err(Error::IdentityMismatch);
        }
        Ok(identity)
    }

    /// Runs blocking store work to completion on the blocking pool.
    pub async fn run<T, F>(self: &Arc<Self>, op: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce(&Layer<S>) -> Result<T, Error> + Send + 'static,
    {
        let backend = Arc::clone(self);
        tokio::task::spawn_blocking(move || op(&backend.layer))
            .await
            .map_err(|err| Error::StorageFatal(format!("blocking task failed: {err}")))?
    }

    /// JSON body of the public leaderboard, served from the cache when possible.
    pub async fn leaderboard_json(self: &Arc<Self>) -> Result<Vec<u8>, Error> {
        if let Some(cache) = &self.cache {
            if let Some(body) = cache.get(LEADERBOARD_KEY).await {
                return Ok(body);
            }
        }
        let entries = self.run(|layer| layer.leaderboard(LEADERBOARD_LIMIT)).await?;
        let body = serde_json::to_vec(&entries)
            .map_err(|err| Error::StorageFatal(format!("encode leaderboard: {err}")))?;
        if let Some(cache) = &self.cache {
            cache.set(LEADERBOARD_KEY, &body).await;
        }
        Ok(body)
    }

    pub(crate) async fn invalidate_leaderboard(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate(LEADERBOARD_KEY).await;
        }
    }

    pub(crate) fn publish(&self, notice: Notice) {
        self.notices.publish(notice);
    }
}
