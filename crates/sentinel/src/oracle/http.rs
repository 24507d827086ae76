//! OpenAI-compatible chat-completions client. The capability catalog is sent
//! as function tools in phase 1; phase 2 sends the outcomes and reads plain
//! text back.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{OracleBrief, PolicyOracle};
use crate::config::OracleConfig;
use crate::errors::SentinelError;
use crate::types::{CapabilityDescriptor, DecisionRequest, Proposal, ProposalRecord, RequestPayload};

const DEFAULT_SYSTEM_PROMPT: &str = "You are the decision engine of a market monitoring service. \
Use the provided tools to gather information or act, then report concisely. \
Only trade when the request or market state clearly warrants it.";

pub struct HttpOracle {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f64>,
    system_prompt: String,
}

impl HttpOracle {
    pub fn new(config: &OracleConfig, api_key: Option<String>) -> Result<Self, SentinelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .build()
            .map_err(|e| SentinelError::Config(format!("failed to build oracle HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        })
    }

    async fn complete(&self, body: Value) -> Result<Value, SentinelError> {
        let start = Instant::now();
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SentinelError::oracle(format!("request timed out: {e}"))
            } else if e.is_connect() {
                SentinelError::oracle(format!("connection failed: {e}"))
            } else {
                SentinelError::oracle(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SentinelError::oracle(format!("endpoint returned {status}: {text}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| SentinelError::oracle(format!("response is not JSON: {e}")))?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if elapsed_ms > 10_000 {
            warn!(elapsed_ms, "slow oracle response");
        }
        debug!(elapsed_ms, model = %self.model, "oracle round-trip");
        Ok(value)
    }

    fn base_body(&self, messages: Vec<Value>) -> Value {
        let mut body = json!({ "model": self.model, "messages": messages });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

#[async_trait]
impl PolicyOracle for HttpOracle {
    async fn propose(&self, brief: &OracleBrief<'_>) -> Result<Vec<Proposal>, SentinelError> {
        let mut body = self.base_body(vec![
            json!({"role": "system", "content": self.system_prompt}),
            json!({"role": "user", "content": describe_request(brief.request)}),
        ]);
        if !brief.catalog.is_empty() {
            body["tools"] = tool_definitions(brief.catalog);
            body["tool_choice"] = json!("auto");
        }

        let response = self.complete(body).await?;
        parse_proposals(&response)
    }

    async fn synthesize(
        &self,
        brief: &OracleBrief<'_>,
        outcomes: &[ProposalRecord],
    ) -> Result<String, SentinelError> {
        let results = serde_json::to_string(outcomes)?;
        let body = self.base_body(vec![
            json!({"role": "system", "content": self.system_prompt}),
            json!({"role": "user", "content": describe_request(brief.request)}),
            json!({
                "role": "user",
                "content": format!(
                    "Outcomes of the actions taken, in order (empty if none):\n{results}\n\n\
                     Write the final response. Mention any failed action."
                ),
            }),
        ]);

        let response = self.complete(body).await?;
        parse_content(&response)
    }
}

/// Catalog as OpenAI function tools.
pub fn tool_definitions(catalog: &[&CapabilityDescriptor]) -> Value {
    Value::Array(
        catalog
            .iter()
            .map(|d| {
                json!({
                    "type": "function",
                    "function": {
                        "name": d.name,
                        "description": format!("{} [{}]", d.description, d.idempotence),
                        "parameters": d.input.to_json_schema(),
                    }
                })
            })
            .collect(),
    )
}

/// User-turn text for a request. Free-text messages pass through verbatim.
pub fn describe_request(request: &DecisionRequest) -> String {
    match &request.payload {
        RequestPayload::Message { text, .. } => text.clone(),
        RequestPayload::Heartbeat {
            snapshot,
            triggers,
            reason,
        } => {
            let snapshot = serde_json::to_string(snapshot).unwrap_or_default();
            let triggers = serde_json::to_string(triggers).unwrap_or_default();
            format!(
                "Heartbeat for {} ({reason}).\nTriggered conditions: {triggers}\nMarket snapshot: {snapshot}",
                request_symbol(request).unwrap_or("?"),
            )
        }
    }
}

fn request_symbol(request: &DecisionRequest) -> Option<&str> {
    match &request.payload {
        RequestPayload::Heartbeat { snapshot, .. } => Some(&snapshot.symbol),
        RequestPayload::Message { .. } => None,
    }
}

fn first_message(response: &Value) -> Result<&Value, SentinelError> {
    response
        .pointer("/choices/0/message")
        .ok_or_else(|| SentinelError::oracle("response has no choices[0].message"))
}

/// Tool calls of the first choice. No tool calls means no proposals.
pub fn parse_proposals(response: &Value) -> Result<Vec<Proposal>, SentinelError> {
    let message = first_message(response)?;
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    calls
        .iter()
        .map(|call| {
            let function = call
                .get("function")
                .ok_or_else(|| SentinelError::oracle("tool call without function"))?;
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| SentinelError::oracle("tool call without name"))?;
            // Arguments arrive as a JSON-encoded string per the protocol;
            // some servers send an object instead.
            let arguments = match function.get("arguments") {
                None | Some(Value::Null) => json!({}),
                Some(Value::String(s)) if s.trim().is_empty() => json!({}),
                Some(Value::String(s)) => serde_json::from_str(s).map_err(|e| {
                    SentinelError::oracle(format!("arguments of {name} are not valid JSON: {e}"))
                })?,
                Some(other) => other.clone(),
            };
            Ok(Proposal::new(name, arguments))
        })
        .collect()
}

/// Text content of the first choice.
pub fn parse_content(response: &Value) -> Result<String, SentinelError> {
    let content = first_message(response)?
        .get("content")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if content.is_empty() {
        return Err(SentinelError::oracle("synthesis returned no text"));
    }
    Ok(content.to_string())
}
