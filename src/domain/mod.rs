//! Domain types for the agentplane core.
//!
//! This module contains the core data structures:
//! - Pipeline: versioned step definitions
//! - Run: execution records and step results
//! - Environment: the dev→qa→uat→prod ladder and its variables
//! - Promotion: asset snapshots, diffs and promotion records
//! - Usage: metered calls and their aggregates

pub mod environment;
pub mod pipeline;
pub mod promotion;
pub mod run;
pub mod usage;

// Re-export commonly used types
pub use environment::{
    EnvVariable, EnvironmentConfig, EnvironmentId, EnvironmentParseError, VariableInput,
    SECRET_MASK,
};
pub use pipeline::{
    Pipeline, PipelineChanges, PipelineDraft, PipelineError, PipelinePattern, PipelineStatus,
    PipelineStep, RetryPolicy,
};
pub use promotion::{
    AssetDelta, AssetRef, AssetSnapshot, AssetType, AssetTypeParseError, DeployedAsset,
    EnvironmentDiff, PromotionRecord, PromotionRequest, PromotionStatus, SnapshotDiff,
};
pub use run::{PipelineRun, RunStatus, StateMap, StepResult, StepStatus};
pub use usage::{
    BillingReport, DailyUsage, Dimension, MeteringAggregation, ModelPrice, UsageEvent,
    UsageFilter, UsageRecord, UsageStatus, UsageSummary,
};
