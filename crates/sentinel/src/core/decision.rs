//! Decision core: one dispatch path for heartbeat and external requests.
//!
//! Two oracle round-trips per request, no more: `propose` selects capability
//! calls, every proposal is executed in order through the registry, then
//! `synthesize` turns the outcomes into the response. A failing proposal is
//! recorded and the batch continues; an oracle failure ends the request in
//! `Failed`. The core holds no mutable state between requests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use super::health::HealthStats;
use crate::capability::CapabilityRegistry;
use crate::errors::SentinelError;
use crate::oracle::{OracleBrief, PolicyOracle};
use crate::store::{record_best_effort, Store, Table};
use crate::types::{
    DecisionPhase, DecisionRequest, DecisionResult, DecisionStatus, InvocationContext, Outcome,
    Proposal, ProposalRecord,
};

pub struct DecisionCore {
    registry: Arc<CapabilityRegistry>,
    oracle: Arc<dyn PolicyOracle>,
    store: Arc<dyn Store>,
    health: Arc<HealthStats>,
    oracle_timeout: Duration,
    capability_timeout: Duration,
}

impl DecisionCore {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        oracle: Arc<dyn PolicyOracle>,
        store: Arc<dyn Store>,
        health: Arc<HealthStats>,
        oracle_timeout: Duration,
        capability_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            oracle,
            store,
            health,
            oracle_timeout,
            capability_timeout,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Run one request to a terminal phase. Never returns an error: failures
    /// are part of the result.
    pub async fn decide(&self, request: DecisionRequest) -> DecisionResult {
        let mut phases = vec![DecisionPhase::Received];
        let catalog = self.registry.catalog();
        let brief = OracleBrief {
            request: &request,
            catalog: &catalog,
        };
        info!(
            correlation_id = %request.correlation_id,
            origin = %request.origin,
            capabilities = catalog.len(),
            "decision request received"
        );

        phases.push(DecisionPhase::Selecting);
        let proposals = match timeout(self.oracle_timeout, self.oracle.propose(&brief)).await {
            Ok(Ok(proposals)) => proposals,
            Ok(Err(e)) => return self.fail(&request, phases, Vec::new(), e).await,
            Err(_) => {
                let e = SentinelError::timeout("policy oracle proposal");
                return self.fail(&request, phases, Vec::new(), e).await;
            }
        };
        debug!(
            correlation_id = %request.correlation_id,
            proposals = proposals.len(),
            "oracle proposals received"
        );

        let mut records = Vec::with_capacity(proposals.len());
        for (index, proposal) in proposals.into_iter().enumerate() {
            phases.push(DecisionPhase::Executing(index));
            records.push(self.execute_proposal(&request, index, proposal).await);
        }

        phases.push(DecisionPhase::Synthesizing);
        let synthesis = timeout(self.oracle_timeout, self.oracle.synthesize(&brief, &records)).await;
        match synthesis {
            Ok(Ok(response)) => {
                phases.push(DecisionPhase::Completed);
                let result = DecisionResult {
                    correlation_id: request.correlation_id,
                    origin: request.origin,
                    proposals: records,
                    status: DecisionStatus::Completed { response },
                    phases,
                    completed_at: chrono::Utc::now().timestamp(),
                };
                info!(
                    correlation_id = %result.correlation_id,
                    proposals = result.proposals.len(),
                    failed = result.failed_proposals().count(),
                    "decision completed"
                );
                self.finish(&result).await;
                result
            }
            Ok(Err(e)) => self.fail(&request, phases, records, e).await,
            Err(_) => {
                let e = SentinelError::timeout("policy oracle synthesis");
                self.fail(&request, phases, records, e).await
            }
        }
    }

    async fn execute_proposal(
        &self,
        request: &DecisionRequest,
        index: usize,
        proposal: Proposal,
    ) -> ProposalRecord {
        let key = proposal
            .idempotency_key
            .clone()
            .unwrap_or_else(|| format!("{}:{index}", request.correlation_id));
        let ctx = InvocationContext::new(Instant::now() + self.capability_timeout).with_key(key.clone());

        let started = Instant::now();
        let result = self
            .registry
            .invoke(&proposal.capability, proposal.arguments.clone(), &ctx)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        if let Err(e) = &result {
            warn!(
                correlation_id = %request.correlation_id,
                index,
                capability = %proposal.capability,
                kind = e.kind(),
                error = %e,
                "proposal failed, continuing with the batch"
            );
        } else {
            debug!(
                correlation_id = %request.correlation_id,
                index,
                capability = %proposal.capability,
                elapsed_ms,
                "proposal executed"
            );
        }

        let record = ProposalRecord {
            index,
            capability: proposal.capability,
            arguments: proposal.arguments,
            idempotency_key: key,
            outcome: Outcome::from_result(result),
            elapsed_ms,
        };

        let mut audit = serde_json::to_value(&record).unwrap_or_else(|_| json!({}));
        audit["correlation_id"] = json!(request.correlation_id);
        audit["origin"] = json!(request.origin);
        record_best_effort(self.store.as_ref(), Table::CapabilityInvocations, audit).await;

        record
    }

    async fn fail(
        &self,
        request: &DecisionRequest,
        mut phases: Vec<DecisionPhase>,
        records: Vec<ProposalRecord>,
        cause: SentinelError,
    ) -> DecisionResult {
        error!(
            correlation_id = %request.correlation_id,
            origin = %request.origin,
            kind = cause.kind(),
            error = %cause,
            "decision failed"
        );
        phases.push(DecisionPhase::Failed);
        let result = DecisionResult {
            correlation_id: request.correlation_id,
            origin: request.origin,
            proposals: records,
            status: DecisionStatus::Failed {
                kind: cause.kind().to_string(),
                reason: cause.to_string(),
            },
            phases,
            completed_at: chrono::Utc::now().timestamp(),
        };
        self.finish(&result).await;
        result
    }

    async fn finish(&self, result: &DecisionResult) {
        self.health.record_decision(result.is_completed());
        match serde_json::to_value(result) {
            Ok(value) => record_best_effort(self.store.as_ref(), Table::DecisionResults, value).await,
            Err(e) => warn!(error = %e, "decision result not serializable, audit skipped"),
        }
    }
}
