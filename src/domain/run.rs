//! Pipeline runs and per-step results.
//!
//! A run is created when execution starts, appended to as steps finish, and
//! becomes the permanent audit record of one orchestration once terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::pipeline::{Pipeline, PipelinePattern};

/// Shared scratchpad threaded through the steps of a run
pub type StateMap = Map<String, Value>;

/// A pipeline execution run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique identifier for this run
    pub id: Uuid,

    pub pipeline_id: Uuid,

    /// Pipeline name at run time
    pub pipeline_name: String,

    /// Pattern at run time
    pub pattern: PipelinePattern,

    pub status: RunStatus,

    pub steps_completed: usize,
    pub steps_total: usize,

    /// Results in the order they were recorded
    pub step_results: Vec<StepResult>,

    pub input_data: StateMap,
    pub output_data: StateMap,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub total_latency_ms: u64,
    pub total_cost_usd: f64,
    pub total_tokens: u64,

    /// Top-level error for failed runs
    pub error: Option<String>,
}

impl PipelineRun {
    /// Start a run for `pipeline`
    pub fn new(pipeline: &Pipeline, input_data: StateMap, steps_total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline.id,
            pipeline_name: pipeline.name.clone(),
            pattern: pipeline.pattern,
            status: RunStatus::Running,
            steps_completed: 0,
            steps_total,
            step_results: Vec::new(),
            input_data,
            output_data: StateMap::new(),
            started_at: Utc::now(),
            completed_at: None,
            total_latency_ms: 0,
            total_cost_usd: 0.0,
            total_tokens: 0,
            error: None,
        }
    }

    /// A terminal run for a pipeline id that did not resolve
    pub fn not_found(pipeline_id: Uuid, input_data: StateMap) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            pipeline_name: String::new(),
            pattern: PipelinePattern::default(),
            status: RunStatus::Failed,
            steps_completed: 0,
            steps_total: 0,
            step_results: Vec::new(),
            input_data,
            output_data: StateMap::new(),
            started_at: now,
            completed_at: Some(now),
            total_latency_ms: 0,
            total_cost_usd: 0.0,
            total_tokens: 0,
            error: Some(format!("pipeline {} not found", pipeline_id)),
        }
    }

    /// Append a step result and update the running totals
    pub fn record_step(&mut self, result: StepResult) {
        if result.is_success() {
            self.steps_completed += 1;
        }
        self.total_cost_usd += result.cost_usd;
        self.total_tokens += result.tokens_used;
        self.step_results.push(result);
    }

    /// Move the run to a terminal status
    pub fn finish(&mut self, status: RunStatus, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.error = error;
        self.completed_at = Some(now);
        self.total_latency_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Running)
    }

    /// Check if the run has reached a terminal status
    pub fn is_finished(&self) -> bool {
        !self.is_running()
    }

    /// Result for a given step id
    pub fn step_result(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Only valid while the engine is executing
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
}

/// Recorded outcome of one step within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub agent_id: String,
    pub status: StepStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub tokens_used: u64,
    pub cost_usd: f64,

    /// Number of attempts made (1 when no retries happened)
    pub attempts: u32,

    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn completed(step_id: impl Into<String>, agent_id: impl Into<String>, output: Value) -> Self {
        Self {
            step_id: step_id.into(),
            agent_id: agent_id.into(),
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            latency_ms: 0,
            tokens_used: 0,
            cost_usd: 0.0,
            attempts: 1,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(step_id: impl Into<String>, agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            agent_id: agent_id.into(),
            status: StepStatus::Failed,
            output: None,
            error: Some(error.into()),
            latency_ms: 0,
            tokens_used: 0,
            cost_usd: 0.0,
            attempts: 1,
            completed_at: Utc::now(),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_usage(mut self, tokens_used: u64, cost_usd: f64) -> Self {
        self.tokens_used = tokens_used;
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Completed
    }
}
