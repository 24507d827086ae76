use async_trait::async_trait;
use serde_json::{json, Value};

use super::schema::str_arg;
use super::{Capability, CapabilityDeps};
use crate::errors::SentinelError;
use crate::types::{
    CapabilityDescriptor, FieldSpec, FieldType, IdempotenceClass, InvocationContext, Schema,
};

/// Outbound notification to the operator channel. At most once per key.
pub struct SendNotification {
    deps: CapabilityDeps,
    descriptor: CapabilityDescriptor,
}

impl SendNotification {
    pub fn new(deps: CapabilityDeps) -> Self {
        Self {
            deps,
            descriptor: CapabilityDescriptor {
                name: "send_notification",
                description: "Send a message to the operator's notification channel.",
                input: Schema::new(vec![FieldSpec::required(
                    "message",
                    FieldType::String,
                    "Text to send",
                )]),
                output: json!({"delivered": "boolean", "chars": "integer"}),
                idempotence: IdempotenceClass::AtMostOnce,
            },
        }
    }
}

#[async_trait]
impl Capability for SendNotification {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn execute(&self, args: Value, _ctx: &InvocationContext) -> Result<Value, SentinelError> {
        let message = str_arg(&args, "message").unwrap_or_default().trim();
        if message.is_empty() {
            return Err(SentinelError::invalid_arguments(
                self.descriptor.name,
                "message must not be empty",
            ));
        }
        self.deps.notifier.notify(message).await?;
        Ok(json!({ "delivered": true, "chars": message.chars().count() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::builtin_registry;
    use crate::capability::tests::harness;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio::time::Instant;

    fn ctx(key: &str) -> InvocationContext {
        InvocationContext::new(Instant::now() + Duration::from_secs(5)).with_key(key)
    }

    #[tokio::test]
    async fn test_same_key_delivers_once() {
        let h = harness(&[dec!(100)]).await;
        let channel = h.channel.clone();
        let registry = builtin_registry(h.deps, 1).unwrap();
        let args = json!({"message": "RSI overbought on BTCUSDT"});

        registry.invoke("send_notification", args.clone(), &ctx("n:0")).await.unwrap();
        registry.invoke("send_notification", args.clone(), &ctx("n:0")).await.unwrap();
        registry.invoke("send_notification", args, &ctx("n:1")).await.unwrap();

        assert_eq!(channel.notes().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let h = harness(&[dec!(100)]).await;
        let err = SendNotification::new(h.deps)
            .execute(json!({"message": "   "}), &ctx("k"))
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::InvalidArguments { .. }));
    }
}
