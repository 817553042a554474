//! Player notices sent after administrative changes.
//!
//! Handlers publish into a bounded queue and never wait on delivery; a background
//! task drains the queue through a [`Notifier`]. Delivery failures are logged only.

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

pub const DEFAULT_BOT_API_BASE: &str = "https://api.telegram.org";

/// A text message addressed to one player's chat.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub chat_id: String,
    pub text: String,
}

impl Notice {
    pub fn coins_granted(user_id: &str, coins: f64) -> Self {
        Self {
            chat_id: user_id.to_string(),
            text: format!(
                "🎁 Вам начислено {} монет от администратора!",
                coins.trunc()
            ),
        }
    }

    pub fn progress_reset(user_id: &str) -> Self {
        Self {
            chat_id: user_id.to_string(),
            text: "⚠️ Ваш прогресс был сброшен администратором".to_string(),
        }
    }

    pub fn banned(user_id: &str, minutes: u64) -> Self {
        Self {
            chat_id: user_id.to_string(),
            text: format!("⛔ Вы заблокированы администратором на {minutes} мин."),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notice: &Notice) -> anyhow::Result<()>;
}

/// Writes notices to the log instead of delivering them.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        info!(chat_id = %notice.chat_id, text = %notice.text, "player notice");
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Delivers notices with the chat bot `sendMessage` method.
pub struct BotApiNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl BotApiNotifier {
    pub fn new(bot_token: &str) -> Self {
        Self::with_api_base(DEFAULT_BOT_API_BASE, bot_token)
    }

    pub fn with_api_base(api_base: &str, bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!(
                "{}/bot{}/sendMessage",
                api_base.trim_end_matches('/'),
                bot_token
            ),
        }
    }
}

#[async_trait]
impl Notifier for BotApiNotifier {
    async fn notify(&self, notice: &Notice) -> anyhow::Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &notice.chat_id,
                text: &notice.text,
            })
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("sendMessage request failed")?
            .error_for_status()
            .map_err(reqwest::Error::without_url)
            .context("sendMessage rejected")?;
        Ok(())
    }
}

/// Sending half of the notice queue.
#[derive(Clone)]
pub struct NoticeQueue {
    sender: mpsc::Sender<Notice>,
}

impl NoticeQueue {
    /// Starts the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<Notice>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(notice) = receiver.recv().await {
                if let Err(err) = notifier.notify(&notice).await {
                    warn!(chat_id = %notice.chat_id, error = ?err, "notice delivery failed");
                }
            }
        });
        Self { sender }
    }

    pub fn publish(&self, notice: Notice) {
        match self.sender.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(notice)) => {
                warn!(chat_id = %notice.chat_id, "notice queue full; dropping notice");
            }
            Err(TrySendError::Closed(notice)) => {
                warn!(chat_id = %notice.chat_id, "notice queue closed; dropping notice");
            }
        }
    }
}
