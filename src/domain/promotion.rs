//! Asset snapshots and promotion records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use super::environment::EnvironmentId;
use crate::core::checksum;

/// Kinds of promotable assets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Agent,
    Tool,
    Prompt,
    Pipeline,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Tool => "tool",
            Self::Prompt => "prompt",
            Self::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = AssetTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "tool" => Ok(Self::Tool),
            "prompt" => Ok(Self::Prompt),
            "pipeline" => Ok(Self::Pipeline),
            other => Err(AssetTypeParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown asset type '{0}' (expected agent, tool, prompt or pipeline)")]
pub struct AssetTypeParseError(pub String);

/// Immutable capture of an asset's configuration at promotion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub asset_type: AssetType,
    pub asset_id: String,
    pub version: u32,
    pub config: Value,

    /// Truncated SHA-256 of the canonical JSON of `config`
    pub checksum: String,

    pub captured_at: DateTime<Utc>,
}

impl AssetSnapshot {
    pub fn capture(asset_type: AssetType, asset_id: impl Into<String>, version: u32, config: Value) -> Self {
        Self {
            asset_type,
            asset_id: asset_id.into(),
            version,
            checksum: checksum::checksum(&config),
            config,
            captured_at: Utc::now(),
        }
    }
}

/// Structural difference between a snapshot and the one it replaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SnapshotDiff {
    /// Nothing was deployed before
    New { checksum: String },

    /// Top-level key changes against the deployed snapshot
    Update {
        added_keys: Vec<String>,
        removed_keys: Vec<String>,
        changed_keys: Vec<String>,
        previous_checksum: String,
        current_checksum: String,
    },
}

impl SnapshotDiff {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New { .. })
    }

    /// Whether the payload is identical to what is deployed
    pub fn is_unchanged(&self) -> bool {
        match self {
            Self::New { .. } => false,
            Self::Update {
                previous_checksum,
                current_checksum,
                ..
            } => previous_checksum == current_checksum,
        }
    }

    pub fn changed_keys(&self) -> &[String] {
        match self {
            Self::New { .. } => &[],
            Self::Update { changed_keys, .. } => changed_keys,
        }
    }

    pub fn added_keys(&self) -> &[String] {
        match self {
            Self::New { .. } => &[],
            Self::Update { added_keys, .. } => added_keys,
        }
    }

    pub fn removed_keys(&self) -> &[String] {
        match self {
            Self::New { .. } => &[],
            Self::Update { removed_keys, .. } => removed_keys,
        }
    }
}

/// Promotion lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStatus {
    Pending,
    /// Transient: approval deploys in the same call
    Approved,
    Rejected,
    Deployed,
    RolledBack,
}

impl PromotionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Deployed => "deployed",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::RolledBack)
    }
}

impl fmt::Display for PromotionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Input to a promotion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRequest {
    pub asset_type: AssetType,
    pub asset_id: String,
    pub asset_name: String,
    pub from_env: EnvironmentId,
    pub to_env: EnvironmentId,
    pub config: Value,
    pub from_version: u32,
    pub to_version: Option<u32>,
    pub requested_by: String,
}

impl PromotionRequest {
    pub fn new(
        asset_type: AssetType,
        asset_id: impl Into<String>,
        from_env: EnvironmentId,
        to_env: EnvironmentId,
        config: Value,
        requested_by: impl Into<String>,
    ) -> Self {
        let asset_id = asset_id.into();
        Self {
            asset_type,
            asset_name: asset_id.clone(),
            asset_id,
            from_env,
            to_env,
            config,
            from_version: 1,
            to_version: None,
            requested_by: requested_by.into(),
        }
    }

    pub fn with_name(mut self, asset_name: impl Into<String>) -> Self {
        self.asset_name = asset_name.into();
        self
    }

    pub fn with_versions(mut self, from_version: u32, to_version: Option<u32>) -> Self {
        self.from_version = from_version;
        self.to_version = to_version;
        self
    }
}

/// Audit record of one promotion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub asset_type: AssetType,
    pub asset_id: String,
    pub asset_name: String,
    pub from_env: EnvironmentId,
    pub to_env: EnvironmentId,
    pub from_version: u32,
    pub to_version: u32,
    pub status: PromotionStatus,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub rejected_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub snapshot: AssetSnapshot,
    pub diff: SnapshotDiff,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// The snapshot currently deployed for an asset in an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedAsset {
    pub tenant_id: String,
    pub environment: EnvironmentId,
    pub asset_name: String,
    pub snapshot: AssetSnapshot,
    pub promotion_id: Uuid,
    pub deployed_by: String,
    pub deployed_at: DateTime<Utc>,
}

/// Identity of a deployed asset, used in environment diffs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub asset_type: AssetType,
    pub asset_id: String,
    pub asset_name: String,
    pub version: u32,
    pub checksum: String,
}

impl From<&DeployedAsset> for AssetRef {
    fn from(asset: &DeployedAsset) -> Self {
        Self {
            asset_type: asset.snapshot.asset_type,
            asset_id: asset.snapshot.asset_id.clone(),
            asset_name: asset.asset_name.clone(),
            version: asset.snapshot.version,
            checksum: asset.snapshot.checksum.clone(),
        }
    }
}

/// An asset deployed in both environments with different content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDelta {
    pub asset_type: AssetType,
    pub asset_id: String,
    pub version_a: u32,
    pub version_b: u32,
    pub checksum_a: String,
    pub checksum_b: String,
}

/// Comparison of the deployed assets of two environments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentDiff {
    pub env_a: EnvironmentId,
    pub env_b: EnvironmentId,
    pub only_in_a: Vec<AssetRef>,
    pub only_in_b: Vec<AssetRef>,
    pub different: Vec<AssetDelta>,
    pub identical_count: usize,
}
