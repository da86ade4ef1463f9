//! Agent invocation interfaces.
//!
//! Steps never talk to an LLM provider directly; they hand an
//! [`AgentRequest`] to an [`AgentInvoker`] and record whatever comes back.
//! Two invokers ship with the crate: a subprocess one and an HTTP one.

pub mod command;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub use command::CommandInvoker;
pub use http::HttpInvoker;

/// Everything an agent needs to execute one step attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub run_id: Uuid,
    pub pipeline_id: Uuid,
    pub step_id: String,
    pub agent_id: String,

    /// The accumulated state, or the value under the step's input key
    pub input: Value,

    /// 1-indexed attempt number
    pub attempt: u32,

    /// Per-attempt deadline enforced by the engine
    pub timeout_seconds: u64,
}

/// Reported outcome of an agent call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Completed,
    Failed,
}

/// What an agent returns for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub status: AgentStatus,

    #[serde(default)]
    pub output: Option<Value>,

    /// Self-reported latency; the engine measures its own when this is 0
    #[serde(default)]
    pub latency_ms: u64,

    #[serde(default)]
    pub tokens_used: u64,

    #[serde(default)]
    pub cost_usd: f64,

    #[serde(default)]
    pub error: Option<String>,
}

impl AgentResponse {
    pub fn completed(output: Value) -> Self {
        Self {
            status: AgentStatus::Completed,
            output: Some(output),
            latency_ms: 0,
            tokens_used: 0,
            cost_usd: 0.0,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: AgentStatus::Failed,
            output: None,
            latency_ms: 0,
            tokens_used: 0,
            cost_usd: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn with_usage(mut self, tokens_used: u64, cost_usd: f64) -> Self {
        self.tokens_used = tokens_used;
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == AgentStatus::Completed
    }
}

/// Pluggable agent execution.
///
/// `Err` means the call itself raised (spawn failure, transport error);
/// an agent that ran and failed returns `Ok` with [`AgentStatus::Failed`].
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Human-readable invoker name
    fn name(&self) -> &str;

    /// Invoke one agent attempt
    async fn invoke(&self, request: AgentRequest) -> Result<AgentResponse>;
}
