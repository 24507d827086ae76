//! Telegram Bot API transport: `sendMessage` for outbound text and a
//! `getUpdates` long-poll loop feeding inbound messages to the router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ConversationChannel, InboundMessage, Notifier};
use crate::config::TelegramConfig;
use crate::constants::{TELEGRAM_API_BASE, TELEGRAM_MAX_MESSAGE_CHARS};
use crate::errors::SentinelError;

const CAPABILITY: &str = "send_notification";

/// Pause after a failed poll before trying again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

pub struct TelegramChannel {
    client: Client,
    bot_url: String,
    notify_chat_id: i64,
    allowed_chat_ids: Vec<i64>,
    poll_timeout_seconds: u64,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig, token: &str) -> Result<Self, SentinelError> {
        // The HTTP timeout must outlast the server-side long-poll.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_seconds + 10))
            .build()
            .map_err(|e| SentinelError::Config(format!("failed to build telegram client: {e}")))?;

        Ok(Self {
            client,
            bot_url: format!("{TELEGRAM_API_BASE}/bot{token}"),
            notify_chat_id: config.notify_chat_id,
            allowed_chat_ids: config.allowed_chat_ids.clone(),
            poll_timeout_seconds: config.poll_timeout_seconds,
        })
    }

    /// Empty allow-list accepts every chat.
    fn accepts(&self, chat_id: i64) -> bool {
        self.allowed_chat_ids.is_empty() || self.allowed_chat_ids.contains(&chat_id)
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), SentinelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_CHARS) {
            let response = self
                .client
                .post(format!("{}/sendMessage", self.bot_url))
                .json(&json!({ "chat_id": chat_id, "text": chunk }))
                .send()
                .await
                .map_err(|e| SentinelError::execution(CAPABILITY, format!("telegram request failed: {e}")))?;

            let status = response.status();
            let body: ApiResponse<serde_json::Value> = response
                .json()
                .await
                .map_err(|e| SentinelError::execution(CAPABILITY, format!("bad telegram response: {e}")))?;
            if !status.is_success() || !body.ok {
                return Err(SentinelError::execution(
                    CAPABILITY,
                    format!(
                        "telegram returned {status}: {}",
                        body.description.unwrap_or_default()
                    ),
                ));
            }
        }
        debug!(chat_id, chars = text.chars().count(), "telegram message sent");
        Ok(())
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, SentinelError> {
        let response = self
            .client
            .get(format!("{}/getUpdates", self.bot_url))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout_seconds.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await?;

        let body: ApiResponse<Vec<Update>> = response.json().await?;
        if !body.ok {
            return Err(SentinelError::execution(
                "telegram_poll",
                body.description.unwrap_or_else(|| "getUpdates failed".into()),
            ));
        }
        Ok(body.result.unwrap_or_default())
    }

    /// Turn a batch of updates into inbound messages and the next offset.
    /// Non-text updates and chats outside the allow-list are dropped.
    pub(crate) fn extract(&self, updates: Vec<Update>, offset: i64) -> (i64, Vec<InboundMessage>) {
        let mut next = offset;
        let mut messages = Vec::new();
        for update in updates {
            next = next.max(update.update_id + 1);
            let Some(message) = update.message else { continue };
            let Some(text) = message.text else { continue };
            if !self.accepts(message.chat.id) {
                warn!(chat_id = message.chat.id, "message from unlisted chat ignored");
                continue;
            }
            messages.push(InboundMessage::new(message.chat.id.to_string(), text));
        }
        (next, messages)
    }

    /// Long-poll until cancelled, forwarding messages to `tx`.
    pub async fn run_poller(
        self: Arc<Self>,
        tx: mpsc::Sender<InboundMessage>,
        cancel: CancellationToken,
    ) {
        info!(poll_timeout_seconds = self.poll_timeout_seconds, "telegram poller started");
        let mut offset = 0i64;

        loop {
            let polled = tokio::select! {
                _ = cancel.cancelled() => break,
                polled = self.get_updates(offset) => polled,
            };

            match polled {
                Ok(updates) => {
                    let (next, messages) = self.extract(updates, offset);
                    offset = next;
                    for message in messages {
                        if tx.send(message).await.is_err() {
                            info!("router gone, telegram poller stopping");
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "telegram poll failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
        info!("telegram poller stopped");
    }
}

#[async_trait]
impl Notifier for TelegramChannel {
    async fn notify(&self, text: &str) -> Result<(), SentinelError> {
        self.send_message(self.notify_chat_id, text).await
    }
}

#[async_trait]
impl ConversationChannel for TelegramChannel {
    async fn reply(&self, conversation: &str, text: &str) -> Result<(), SentinelError> {
        let chat_id: i64 = conversation.parse().map_err(|_| {
            SentinelError::execution(CAPABILITY, format!("'{conversation}' is not a telegram chat id"))
        })?;
        self.send_message(chat_id, text).await
    }
}

/// Split on character boundaries into chunks of at most `max` UTF-16 code
/// units, the unit Telegram counts message length in.
pub(crate) fn split_message(text: &str, max: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let max = max.max(2);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut units = 0;
    for c in text.chars() {
        let width = c.len_utf16();
        if units + width > max {
            chunks.push(std::mem::take(&mut current));
            units = 0;
        }
        current.push(c);
        units += width;
    }
    chunks.push(current);
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(allowed: Vec<i64>) -> TelegramChannel {
        let config = TelegramConfig {
            bot_token_env: "TELEGRAM_BOT_TOKEN".into(),
            notify_chat_id: 7,
            allowed_chat_ids: allowed,
            poll_timeout_seconds: 30,
        };
        TelegramChannel::new(&config, "123:abc").unwrap()
    }

    fn updates(raw: serde_json::Value) -> Vec<Update> {
        let body: ApiResponse<Vec<Update>> = serde_json::from_value(raw).unwrap();
        assert!(body.ok);
        body.result.unwrap()
    }

    #[test]
    fn test_extract_text_messages_and_offset() {
        let raw = json!({
            "ok": true,
            "result": [
                {"update_id": 10, "message": {"chat": {"id": 7}, "text": "status"}},
                {"update_id": 11, "message": {"chat": {"id": 7}}},
                {"update_id": 12, "edited_message": {"chat": {"id": 7}, "text": "x"}},
                {"update_id": 13, "message": {"chat": {"id": 8}, "text": "buy btc"}}
            ]
        });
        let (next, messages) = channel(vec![]).extract(updates(raw), 0);
        assert_eq!(next, 14);
        assert_eq!(
            messages,
            vec![InboundMessage::new("7", "status"), InboundMessage::new("8", "buy btc")]
        );
    }

    #[test]
    fn test_allow_list_filters_chats() {
        let raw = json!({
            "ok": true,
            "result": [
                {"update_id": 1, "message": {"chat": {"id": 7}, "text": "hi"}},
                {"update_id": 2, "message": {"chat": {"id": 99}, "text": "intruder"}}
            ]
        });
        let (next, messages) = channel(vec![7]).extract(updates(raw), 0);
        assert_eq!(next, 3);
        assert_eq!(messages, vec![InboundMessage::new("7", "hi")]);
    }

    #[test]
    fn test_empty_batch_keeps_offset() {
        let raw = json!({"ok": true, "result": []});
        let (next, messages) = channel(vec![]).extract(updates(raw), 42);
        assert_eq!(next, 42);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_split_message_on_char_boundaries() {
        assert_eq!(split_message("abcdef", 4), vec!["abcd", "ef"]);
        assert_eq!(split_message("ééé", 2), vec!["éé", "é"]);
        assert_eq!(split_message("", 10), vec![""]);
    }

    #[test]
    fn test_split_message_counts_utf16_units() {
        // Each emoji is two UTF-16 units.
        let text = "🚀".repeat(3);
        assert_eq!(split_message(&text, 4), vec!["🚀🚀", "🚀"]);
        assert_eq!(split_message("a🚀b", 2), vec!["a", "🚀", "b"]);

        let long = "📈".repeat(TELEGRAM_MAX_MESSAGE_CHARS);
        let chunks = split_message(&long, TELEGRAM_MAX_MESSAGE_CHARS);
        assert_eq!(chunks.len(), 2);
        assert!(chunks
            .iter()
            .all(|c| c.encode_utf16().count() <= TELEGRAM_MAX_MESSAGE_CHARS));
    }

    #[tokio::test]
    async fn test_reply_rejects_non_numeric_conversation() {
        let err = channel(vec![]).reply("general", "hello").await.unwrap_err();
        assert!(matches!(err, SentinelError::CapabilityExecution { .. }));
    }
}
