//! Usage events and metering aggregates.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a metered call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    #[default]
    Success,
    Error,
    Timeout,
}

/// One metered gateway call. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub group_id: Option<String>,
    pub lob_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub model_id: Option<String>,
    pub provider: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub status: UsageStatus,
}

/// Input to [`crate::core::UsageMeter::record`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageEvent {
    /// Defaults to now
    pub timestamp: Option<DateTime<Utc>>,
    pub group_id: Option<String>,
    pub lob_id: Option<String>,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub model_id: Option<String>,
    pub provider: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,

    /// Defaults to input + output
    pub total_tokens: Option<u64>,

    /// Computed from the price table when absent
    pub cost_usd: Option<f64>,

    pub latency_ms: u64,
    pub status: UsageStatus,
}

impl UsageEvent {
    pub fn for_model(model_id: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            model_id: Some(model_id.into()),
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_lob(mut self, lob_id: impl Into<String>) -> Self {
        self.lob_id = Some(lob_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = Some(cost_usd);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_status(mut self, status: UsageStatus) -> Self {
        self.status = status;
        self
    }
}

/// USD price per 1000 tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl ModelPrice {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

/// Attribute usage can be grouped by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Group,
    Lob,
    Agent,
    Model,
    User,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Lob => "lob",
            Self::Agent => "agent",
            Self::Model => "model",
            Self::User => "user",
        }
    }

    /// The record's value for this dimension
    pub fn value_of<'a>(&self, record: &'a UsageRecord) -> Option<&'a str> {
        match self {
            Self::Group => record.group_id.as_deref(),
            Self::Lob => record.lob_id.as_deref(),
            Self::Agent => record.agent_id.as_deref(),
            Self::Model => record.model_id.as_deref(),
            Self::User => record.user_id.as_deref(),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Restricts which records an aggregation reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageFilter {
    pub group_id: Option<String>,
    pub lob_id: Option<String>,
    pub agent_id: Option<String>,

    /// Trailing window in days
    pub period_days: u32,
}

impl Default for UsageFilter {
    fn default() -> Self {
        Self {
            group_id: None,
            lob_id: None,
            agent_id: None,
            period_days: 30,
        }
    }
}

impl UsageFilter {
    pub fn last_days(period_days: u32) -> Self {
        Self {
            period_days,
            ..Default::default()
        }
    }

    pub fn matches(&self, record: &UsageRecord) -> bool {
        fn allows(wanted: &Option<String>, actual: &Option<String>) -> bool {
            wanted.is_none() || wanted == actual
        }

        allows(&self.group_id, &record.group_id)
            && allows(&self.lob_id, &record.lob_id)
            && allows(&self.agent_id, &record.agent_id)
    }
}

/// Per-value statistics for one dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeteringAggregation {
    pub dimension: Dimension,
    pub value: String,
    pub total_requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
}

/// Totals over a filtered window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub period_days: u32,
    pub total_requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    pub unique_agents: usize,
    pub unique_models: usize,
    pub unique_users: usize,
}

/// One UTC day of usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub requests: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Chargeback report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingReport {
    pub generated_at: DateTime<Utc>,
    pub period_days: u32,
    pub summary: UsageSummary,
    pub by_model: Vec<MeteringAggregation>,
    pub by_agent: Vec<MeteringAggregation>,
}
