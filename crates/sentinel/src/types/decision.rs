use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::indicator::MarketSnapshot;
use super::trigger::TriggerEvent;
use crate::errors::SentinelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Origin {
    Heartbeat,
    ExternalMessage,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heartbeat => f.write_str("heartbeat"),
            Self::ExternalMessage => f.write_str("external-message"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestPayload {
    Heartbeat {
        snapshot: MarketSnapshot,
        triggers: Vec<TriggerEvent>,
        /// Why the scheduler escalated this tick.
        reason: String,
    },
    Message {
        conversation: String,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub correlation_id: Uuid,
    pub origin: Origin,
    pub payload: RequestPayload,
    /// Unix seconds.
    pub received_at: i64,
}

impl DecisionRequest {
    pub fn heartbeat(snapshot: MarketSnapshot, triggers: Vec<TriggerEvent>, reason: String) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            origin: Origin::Heartbeat,
            payload: RequestPayload::Heartbeat {
                snapshot,
                triggers,
                reason,
            },
            received_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn external(conversation: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            origin: Origin::ExternalMessage,
            payload: RequestPayload::Message {
                conversation: conversation.into(),
                text: text.into(),
            },
            received_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// One capability call proposed by the policy oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub capability: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl Proposal {
    pub fn new(capability: impl Into<String>, arguments: Value) -> Self {
        Self {
            capability: capability.into(),
            arguments,
            idempotency_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { value: Value },
    Failure { kind: String, message: String },
}

impl Outcome {
    pub fn from_result(result: Result<Value, SentinelError>) -> Self {
        match result {
            Ok(value) => Self::Success { value },
            Err(e) => Self::Failure {
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Executed proposal with its outcome, in proposal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub index: usize,
    pub capability: String,
    pub arguments: Value,
    pub idempotency_key: String,
    pub outcome: Outcome,
    pub elapsed_ms: u64,
}

/// Decision lifecycle phases, recorded in the order they were entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "index", rename_all = "snake_case")]
pub enum DecisionPhase {
    Received,
    Selecting,
    Executing(usize),
    Synthesizing,
    Completed,
    Failed,
}

impl DecisionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DecisionStatus {
    Completed { response: String },
    Failed { kind: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub correlation_id: Uuid,
    pub origin: Origin,
    pub proposals: Vec<ProposalRecord>,
    pub status: DecisionStatus,
    pub phases: Vec<DecisionPhase>,
    /// Unix seconds.
    pub completed_at: i64,
}

impl DecisionResult {
    pub fn is_completed(&self) -> bool {
        matches!(self.status, DecisionStatus::Completed { .. })
    }

    pub fn failed_proposals(&self) -> impl Iterator<Item = &ProposalRecord> {
        self.proposals.iter().filter(|p| !p.outcome.is_success())
    }

    /// Text suitable for sending back over a conversational channel.
    ///
    /// Always lists per-proposal success so partial failures stay visible.
    pub fn render(&self) -> String {
        let mut out = match &self.status {
            DecisionStatus::Completed { response } => response.clone(),
            DecisionStatus::Failed { kind, reason } => {
                format!("Request failed ({kind}): {reason}")
            }
        };

        if !self.proposals.is_empty() {
            out.push_str("\n\n");
            for p in &self.proposals {
                let mark = match &p.outcome {
                    Outcome::Success { .. } => "ok".to_string(),
                    Outcome::Failure { kind, message } => format!("failed [{kind}] {message}"),
                };
                out.push_str(&format!("- {}: {}\n", p.capability, mark));
            }
        }
        out.trim_end().to_string()
    }
}
