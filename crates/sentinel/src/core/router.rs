//! Request router: inbound conversation messages go straight to the decision
//! core, with no trigger or cooldown gating, and the rendered result is sent
//! back to the originating conversation. Messages are handled concurrently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::decision::DecisionCore;
use super::health::HealthStats;
use crate::channel::{ConversationChannel, InboundMessage};
use crate::types::{DecisionRequest, DecisionResult};

pub struct RequestRouter {
    decision: Arc<DecisionCore>,
    channel: Arc<dyn ConversationChannel>,
    health: Arc<HealthStats>,
}

impl RequestRouter {
    pub fn new(
        decision: Arc<DecisionCore>,
        channel: Arc<dyn ConversationChannel>,
        health: Arc<HealthStats>,
    ) -> Self {
        Self {
            decision,
            channel,
            health,
        }
    }

    /// Decide on one message and reply. Reply failures are logged only.
    pub async fn handle(&self, message: InboundMessage) -> DecisionResult {
        self.health.record_message();
        let request = DecisionRequest::external(&message.conversation, &message.text);
        info!(
            correlation_id = %request.correlation_id,
            conversation = %message.conversation,
            "inbound message routed"
        );

        let result = self.decision.decide(request).await;
        if let Err(e) = self.channel.reply(&message.conversation, &result.render()).await {
            warn!(
                correlation_id = %result.correlation_id,
                conversation = %message.conversation,
                error = %e,
                "reply failed"
            );
        }
        result
    }

    /// Consume messages until cancelled or the sender side closes; in-flight
    /// requests are awaited before returning.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<InboundMessage>, cancel: CancellationToken) {
        info!("request router started");
        let mut inflight = JoinSet::new();

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => message,
            };
            let Some(message) = message else { break };

            while inflight.try_join_next().is_some() {}
            let router = Arc::clone(&self);
            inflight.spawn(async move {
                router.handle(message).await;
            });
        }

        while inflight.join_next().await.is_some() {}
        info!("request router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use serde_json::json;

    use crate::channel::tests::RecordingChannel;
    use crate::core::decision::tests::{stub_registry, ScriptedOracle};
    use crate::store::tests::MemoryStore;
    use crate::types::{Origin, Proposal, RequestPayload};

    fn router(oracle: Arc<ScriptedOracle>) -> (Arc<RequestRouter>, Arc<RecordingChannel>, Arc<HealthStats>) {
        let (registry, _, _) = stub_registry();
        let health = Arc::new(HealthStats::new());
        let decision = Arc::new(DecisionCore::new(
            registry,
            oracle,
            Arc::new(MemoryStore::default()),
            health.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        ));
        let channel = Arc::new(RecordingChannel::default());
        let router = Arc::new(RequestRouter::new(decision, channel.clone(), health.clone()));
        (router, channel, health)
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_is_forwarded_verbatim_and_answered() {
        let oracle = Arc::new(ScriptedOracle::proposing(vec![Proposal::new(
            "get_system_status",
            json!({}),
        )]));
        let (router, channel, health) = router(oracle.clone());

        let result = router.handle(InboundMessage::new("42", "status")).await;

        assert_eq!(result.origin, Origin::ExternalMessage);
        assert!(result.is_completed());
        let requests = oracle.requests.lock().unwrap().clone();
        assert_eq!(
            requests[0].payload,
            RequestPayload::Message {
                conversation: "42".into(),
                text: "status".into()
            }
        );
        let replies = channel.replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, "42");
        assert!(replies[0].1.starts_with("1 action(s), 0 failed"));
        assert_eq!(health.snapshot().messages_received, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oracle_failure_reply_carries_cause() {
        let (router, channel, _) = router(Arc::new(ScriptedOracle::failing_propose()));

        router.handle(InboundMessage::new("7", "buy everything")).await;

        let replies = channel.replies();
        assert!(replies[0].1.contains("oracle_failure"));
        assert!(replies[0].1.contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_are_handled_concurrently() {
        let oracle = Arc::new(ScriptedOracle::proposing(vec![]).slow(Duration::from_secs(10)));
        let (router, channel, _) = router(oracle.clone());
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&router).run(rx, cancel.clone()));

        let start = tokio::time::Instant::now();
        for i in 0..3 {
            tx.send(InboundMessage::new(i.to_string(), "status")).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(channel.replies().len(), 3);
        assert_eq!(oracle.propose_calls.load(Ordering::SeqCst), 3);
        // Three 10s oracle calls overlapped rather than running back to back.
        assert!(start.elapsed() < Duration::from_secs(20));
    }
}
