//! agentplane - Multi-tenant control plane for LLM agents
//!
//! Runs multi-agent pipelines, keeps an immutable history of their runs,
//! manages a dev → qa → uat → prod environment ladder per tenant, promotes
//! checksummed asset snapshots along that ladder and meters model usage
//! for chargeback.
//!
//! # Modules
//!
//! - `adapters`: Agent invocation backends (subprocess, HTTP)
//! - `core`: Engines (Orchestrator, PipelineCatalog, RunHistory,
//!   EnvironmentRegistry, PromotionWorkflow, UsageMeter)
//! - `domain`: Data structures (Pipeline, PipelineRun, EnvironmentConfig,
//!   PromotionRecord, UsageRecord)
//! - `storage`: In-memory and SQLite document stores
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Register and run a pipeline
//! agentplane pipeline create research.yaml
//! echo '{"query": "rust"}' | agentplane pipeline run <pipeline-id>
//!
//! # Promote an agent config from dev to qa
//! agentplane promote request agent triage dev qa --config triage.json
//!
//! # Cost per model over the last week
//! agentplane usage by model --days 7
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod storage;

// Re-export main types at crate root for convenience
pub use adapters::{AgentInvoker, AgentRequest, AgentResponse};
pub use crate::core::{
    EnvironmentRegistry, Orchestrator, PipelineCatalog, PromotionWorkflow, RunHistory, UsageMeter,
};
pub use domain::{Pipeline, PipelineRun, PromotionRecord, RunStatus, UsageRecord};
pub use storage::Store;
