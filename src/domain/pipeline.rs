//! Pipeline definitions.
//!
//! A pipeline is a named, versioned, ordered set of steps, each bound to an
//! external agent, executed under one orchestration pattern. Drafts can be
//! written in YAML and loaded with [`PipelineDraft::from_yaml`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::limits::ExecutionLimits;

/// How the steps of a pipeline are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePattern {
    /// One step after another, halting on the first failure
    #[default]
    Sequential,

    /// All steps concurrently, tolerating partial failure
    Parallel,

    /// A delegation record followed by all spokes concurrently
    Supervisor,

    /// Routed by step conditions (executed sequentially; conditions are not evaluated)
    Conditional,

    /// Fan-out/fan-in (executed sequentially)
    MapReduce,
}

impl PipelinePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Supervisor => "supervisor",
            Self::Conditional => "conditional",
            Self::MapReduce => "map_reduce",
        }
    }
}

impl fmt::Display for PipelinePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Lifecycle status of a pipeline definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Draft,
    Active,
    Paused,
    Archived,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Archived => "archived",
        };
        f.pad(name)
    }
}

/// A single step in a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Step identifier (unique within the pipeline)
    #[serde(default = "generate_step_id")]
    pub id: String,

    /// External agent this step delegates to
    pub agent_id: String,

    /// Execution order; lower runs first
    #[serde(default)]
    pub order: i32,

    /// State key passed to the agent as its input (whole state when unset)
    #[serde(default)]
    pub input_key: Option<String>,

    /// State key the agent's output is written to
    #[serde(default)]
    pub output_key: Option<String>,

    /// Routing condition, stored but not evaluated
    #[serde(default)]
    pub condition: Option<String>,

    /// Hard per-attempt timeout; 0 falls back to the engine default
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,

    /// Extra attempts after the first failure
    #[serde(default)]
    pub retry_count: u32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn generate_step_id() -> String {
    Uuid::new_v4().to_string()
}
fn default_step_timeout() -> u64 {
    60
}
fn default_enabled() -> bool {
    true
}

impl PipelineStep {
    /// Create an enabled step bound to `agent_id`
    pub fn new(agent_id: impl Into<String>, order: i32) -> Self {
        Self {
            id: generate_step_id(),
            agent_id: agent_id.into(),
            order,
            input_key: None,
            output_key: None,
            condition: None,
            timeout_seconds: default_step_timeout(),
            retry_count: 0,
            enabled: true,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Effective per-attempt timeout for this step
    pub fn timeout(&self, limits: &ExecutionLimits) -> Duration {
        let seconds = if self.timeout_seconds == 0 {
            limits.default_step_timeout_seconds
        } else {
            self.timeout_seconds
        };
        Duration::from_secs(seconds)
    }

    /// Retry policy derived from the step's retry count
    pub fn retry_policy(&self, limits: &ExecutionLimits) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_count.saturating_add(1),
            initial_delay_ms: limits.retry_initial_delay_ms,
            max_delay_ms: limits.retry_max_delay_ms,
            backoff_multiplier: limits.retry_backoff_multiplier,
        }
    }
}

/// A stored, versioned pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub pattern: PipelinePattern,
    pub steps: Vec<PipelineStep>,
    pub supervisor_agent_id: Option<String>,

    /// Incremented on every update, starting at 1
    pub version: u32,

    pub status: PipelineStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    /// Build version 1 of a pipeline from a draft
    pub fn from_draft(draft: PipelineDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: draft.name,
            description: draft.description,
            pattern: draft.pattern,
            steps: draft.steps,
            supervisor_agent_id: draft.supervisor_agent_id,
            version: 1,
            status: draft.status,
            created_at: now,
            updated_at: now,
        }
    }

    /// Enabled steps in execution order.
    ///
    /// The sort is stable, so steps sharing an `order` value run in the
    /// order they appear in `steps`.
    pub fn enabled_steps(&self) -> Vec<&PipelineStep> {
        let mut steps: Vec<&PipelineStep> = self.steps.iter().filter(|s| s.enabled).collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_definition(&self.name, &self.steps)
    }
}

/// Fields needed to create a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDraft {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub pattern: PipelinePattern,

    pub steps: Vec<PipelineStep>,

    #[serde(default)]
    pub supervisor_agent_id: Option<String>,

    #[serde(default)]
    pub status: PipelineStatus,
}

impl PipelineDraft {
    pub fn new(name: impl Into<String>, pattern: PipelinePattern) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            pattern,
            steps: Vec::new(),
            supervisor_agent_id: None,
            status: PipelineStatus::Draft,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: PipelineStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_supervisor(mut self, agent_id: impl Into<String>) -> Self {
        self.supervisor_agent_id = Some(agent_id.into());
        self
    }

    /// Load a draft from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;

        Self::from_yaml(&content)
    }

    /// Parse a draft from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse pipeline YAML")
    }

    /// Validate the draft before it is stored
    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_definition(&self.name, &self.steps)
    }
}

/// Mutable fields of a pipeline; identity and creation time are not representable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub pattern: Option<PipelinePattern>,
    pub steps: Option<Vec<PipelineStep>>,
    pub supervisor_agent_id: Option<Option<String>>,
    pub status: Option<PipelineStatus>,
}

impl PipelineChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.pattern.is_none()
            && self.steps.is_none()
            && self.supervisor_agent_id.is_none()
            && self.status.is_none()
    }

    /// Apply the changes in place (version and timestamps are left to the caller)
    pub fn apply_to(self, pipeline: &mut Pipeline) {
        if let Some(name) = self.name {
            pipeline.name = name;
        }
        if let Some(description) = self.description {
            pipeline.description = description;
        }
        if let Some(pattern) = self.pattern {
            pipeline.pattern = pattern;
        }
        if let Some(steps) = self.steps {
            pipeline.steps = steps;
        }
        if let Some(supervisor) = self.supervisor_agent_id {
            pipeline.supervisor_agent_id = supervisor;
        }
        if let Some(status) = self.status {
            pipeline.status = status;
        }
    }
}

fn validate_definition(name: &str, steps: &[PipelineStep]) -> Result<(), PipelineError> {
    if name.trim().is_empty() {
        return Err(PipelineError::EmptyName);
    }

    let mut ids = HashSet::new();
    let mut orders: HashMap<i32, &str> = HashMap::new();

    for step in steps {
        if step.agent_id.trim().is_empty() {
            return Err(PipelineError::MissingAgent {
                step_id: step.id.clone(),
            });
        }

        if !ids.insert(step.id.as_str()) {
            return Err(PipelineError::DuplicateStepId(step.id.clone()));
        }

        if !step.enabled {
            continue;
        }

        if let Some(first) = orders.insert(step.order, step.id.as_str()) {
            return Err(PipelineError::DuplicateOrder {
                order: step.order,
                first: first.to_string(),
                second: step.id.clone(),
            });
        }
    }

    Ok(())
}

/// Pipeline definition errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Pipeline name cannot be empty")]
    EmptyName,

    #[error("Step '{step_id}' has no agent")]
    MissingAgent { step_id: String },

    #[error("Duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("Steps '{first}' and '{second}' share order {order}")]
    DuplicateOrder {
        order: i32,
        first: String,
        second: String,
    },
}

/// Attempt budget and backoff for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    /// Upper bound on any single wait
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Wait before retrying after failed attempt `attempt` (1-based).
    /// Grows geometrically from `initial_delay_ms` up to `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let grown = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(grown.min(self.max_delay_ms as f64) as u64)
    }

    /// Whether another attempt is allowed after `attempt` failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
