//! Conversational channel boundary: outbound notifications, replies to
//! inbound conversations, and the inbound message type fed to the router.

pub mod telegram;

pub use telegram::TelegramChannel;

use async_trait::async_trait;
use tracing::info;

use crate::errors::SentinelError;

/// Free-text message received from an external conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub conversation: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(conversation: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            conversation: conversation.into(),
            text: text.into(),
        }
    }
}

/// Outbound, unsolicited notifications (alerts, trade confirmations).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), SentinelError>;
}

/// Replies to a specific inbound conversation.
#[async_trait]
pub trait ConversationChannel: Send + Sync {
    async fn reply(&self, conversation: &str, text: &str) -> Result<(), SentinelError>;
}

/// Writes notifications and replies to the log. Used when no channel is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, text: &str) -> Result<(), SentinelError> {
        info!(target: "notification", "{text}");
        Ok(())
    }
}

#[async_trait]
impl ConversationChannel for LogNotifier {
    async fn reply(&self, conversation: &str, text: &str) -> Result<(), SentinelError> {
        info!(target: "notification", conversation, "{text}");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Captures everything sent through it.
    #[derive(Default)]
    pub(crate) struct RecordingChannel {
        pub(crate) notes: Mutex<Vec<String>>,
        pub(crate) replies: Mutex<Vec<(String, String)>>,
        pub(crate) fail: bool,
    }

    impl RecordingChannel {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn notes(&self) -> Vec<String> {
            self.notes.lock().unwrap().clone()
        }

        pub(crate) fn replies(&self) -> Vec<(String, String)> {
            self.replies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingChannel {
        async fn notify(&self, text: &str) -> Result<(), SentinelError> {
            if self.fail {
                return Err(SentinelError::execution("send_notification", "channel down"));
            }
            self.notes.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl ConversationChannel for RecordingChannel {
        async fn reply(&self, conversation: &str, text: &str) -> Result<(), SentinelError> {
            self.replies
                .lock()
                .unwrap()
                .push((conversation.to_string(), text.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        assert!(LogNotifier.notify("hello").await.is_ok());
        assert!(LogNotifier.reply("42", "hello").await.is_ok());
    }
}
