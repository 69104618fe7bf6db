//! Telegram adapter (teloxide).
//!
//! Outbound: [`TelegramMessenger`] implements the core `MessagingPort`.
//! Inbound: [`router::run_polling`] turns Bot API updates into
//! `TransportEvent`s on a channel.

use async_trait::async_trait;
use teloxide::{prelude::*, types::ChatId};
use tokio::time::sleep;

pub mod router;

pub use teloxide::Bot;

use finbot_core::{domain::SenderId, errors::Error, messaging::port::MessagingPort, Result};

/// Telegram's cap on one text message.
const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    /// Retries only on an explicit flood-wait from Telegram. The reply is
    /// sent at most twice.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::warn!(wait = ?d, "telegram flood control, waiting");
                    sleep(d).await;
                }
                Err(other) => return Err(Self::map_err(other)),
            }
        }
    }
}

/// Sender ids are Telegram user ids, which double as private chat ids.
pub fn chat_for(recipient: &SenderId) -> Result<ChatId> {
    recipient
        .as_str()
        .trim()
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| Error::External(format!("not a telegram chat id: {recipient}")))
}

fn clamp_text(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_LEN {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_MESSAGE_LEN - 1).collect();
    out.push('…');
    out
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_reply(&self, recipient: &SenderId, text: &str) -> Result<()> {
        let chat = chat_for(recipient)?;
        let body = clamp_text(text);
        self.with_retry(|| self.bot.send_message(chat, body.clone()))
            .await?;
        Ok(())
    }
}
