pub mod sqlite;

pub use sqlite::SqliteStore;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::errors::SentinelError;

/// Audit tables. Closed set: callers cannot name arbitrary tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    TriggerEvents,
    DecisionResults,
    CapabilityInvocations,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerEvents => "trigger_events",
            Self::DecisionResults => "decision_results",
            Self::CapabilityInvocations => "capability_invocations",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Conjunction of top-level JSON field equalities.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub equals: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    /// Unix seconds.
    pub created_at: i64,
    pub record: Value,
}

/// Persistent audit store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Append a record; returns its id.
    async fn insert(&self, table: Table, record: Value) -> Result<i64, SentinelError>;

    async fn query(
        &self,
        table: Table,
        filter: &Filter,
        limit: u32,
        order: SortOrder,
    ) -> Result<Vec<StoredRecord>, SentinelError>;
}

/// Insert for audit paths where a store outage must not fail the caller.
pub async fn record_best_effort(store: &dyn Store, table: Table, record: Value) {
    if let Err(e) = store.insert(table, record).await {
        warn!(%table, error = %e, "audit write failed, continuing");
    }
}
