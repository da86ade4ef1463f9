//! Core engines.
//!
//! This module contains:
//! - Orchestrator: pipeline execution with bounded parallelism
//! - PipelineCatalog: pipeline CRUD and version history
//! - RunHistory: persisted runs
//! - EnvironmentRegistry: per-tenant environments and variables
//! - PromotionWorkflow: the approval/deploy/rollback state machine
//! - UsageMeter: usage records and their aggregates

pub mod checksum;
pub mod environments;
pub mod history;
pub mod limits;
pub mod metering;
pub mod orchestrator;
pub mod pipelines;
pub mod promotion;

// Re-export commonly used types
pub use checksum::{canonical_json, checksum, diff_keys, snapshot_diff, KeyDiff};
pub use environments::EnvironmentRegistry;
pub use history::RunHistory;
pub use limits::{ExecutionLimits, StepLimiter};
pub use metering::{default_price_table, ProviderResponseContext, UsageMeter, UNASSIGNED};
pub use orchestrator::{Orchestrator, DELEGATION_STEP_ID};
pub use pipelines::PipelineCatalog;
pub use promotion::{AutoApprovalPolicy, PromotionError, PromotionFilter, PromotionWorkflow};
