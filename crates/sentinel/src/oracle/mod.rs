//! Policy oracle boundary: the external decision service that picks
//! capabilities for a request and then writes the final response.

pub mod http;

pub use http::HttpOracle;

use async_trait::async_trait;

use crate::errors::SentinelError;
use crate::types::{CapabilityDescriptor, DecisionRequest, Proposal, ProposalRecord};

/// What the oracle sees: the request and the full capability catalog.
#[derive(Debug, Clone, Copy)]
pub struct OracleBrief<'a> {
    pub request: &'a DecisionRequest,
    pub catalog: &'a [&'a CapabilityDescriptor],
}

/// Two-phase protocol. The decision core calls each method at most once per
/// request and bounds both by its own deadline.
#[async_trait]
pub trait PolicyOracle: Send + Sync {
    /// Phase 1: zero or more capability calls, in execution order.
    async fn propose(&self, brief: &OracleBrief<'_>) -> Result<Vec<Proposal>, SentinelError>;

    /// Phase 2: final response text given every proposal's outcome.
    async fn synthesize(
        &self,
        brief: &OracleBrief<'_>,
        outcomes: &[ProposalRecord],
    ) -> Result<String, SentinelError>;
}
