use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

/// Whether repeated invocation with the same key is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdempotenceClass {
    SafeToRetry,
    AtMostOnce,
}

impl fmt::Display for IdempotenceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SafeToRetry => f.write_str("safe-to-retry"),
            Self::AtMostOnce => f.write_str("at-most-once"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    /// Any JSON number, or a string that parses as a decimal.
    Number,
    Boolean,
    StringArray,
}

impl FieldType {
    pub fn json_type(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::StringArray => "array",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldType,
    pub required: bool,
    /// Closed set of accepted string values, if any.
    pub allowed: Option<&'static [&'static str]>,
    pub description: &'static str,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: true,
            allowed: None,
            description,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            required: false,
            allowed: None,
            description,
        }
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

/// Ordered field list of a capability's argument object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub fields: Vec<FieldSpec>,
}

/// Static description of a registered capability, shown to the policy oracle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input: Schema,
    /// Informal shape of the success value.
    pub output: Value,
    pub idempotence: IdempotenceClass,
}

/// Per-call context supplied by the caller of `CapabilityRegistry::invoke`.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub idempotency_key: Option<String>,
    pub deadline: Instant,
}

impl InvocationContext {
    pub fn new(deadline: Instant) -> Self {
        Self {
            idempotency_key: None,
            deadline,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}
