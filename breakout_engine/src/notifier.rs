/// notifier.rs — Operator notifications
///
/// Best effort only: a failed send is logged and dropped, it never fails a cycle.
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html;
use tracing::{info, warn};

use crate::config::TelegramSettings;

const HEADER: &str = "🤖 <b>BTC Bot</b>";
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str);
}

/// Telegram chat via the Bot API, HTML parse mode.
pub struct TelegramNotifier {
    bot:     Bot,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn new(settings: &TelegramSettings) -> Self {
        Self {
            bot:     Bot::new(settings.token.clone()),
            chat_id: ChatId(settings.chat_id),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) {
        let text = format!("{HEADER}\n\n{}", html::escape(message));
        let request = self.bot.send_message(self.chat_id, text).parse_mode(ParseMode::Html);
        match tokio::time::timeout(SEND_TIMEOUT, request.send()).await {
            Ok(Ok(_))  => {}
            Ok(Err(e)) => warn!("Telegram send failed: {e}"),
            Err(_)     => warn!("Telegram send timed out after {}s", SEND_TIMEOUT.as_secs()),
        }
    }
}

/// Stand-in when Telegram is not configured: messages go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) {
        info!(target: "notify", "{message}");
    }
}
