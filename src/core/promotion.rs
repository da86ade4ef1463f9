//! Promotion workflow.
//!
//! Moves immutable asset snapshots up the environment ladder:
//!
//! ```text
//! pending ──approve──▶ approved ──deploy──▶ deployed ──rollback──▶ rolled_back
//!    │
//!    └──reject──▶ rejected
//! ```
//!
//! `approved` is transient: approval deploys in the same call. Destinations
//! in the auto-approve set skip `pending` entirely. Every record is kept for
//! audit; only the deployed-snapshot table is overwritten.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::checksum::snapshot_diff;
use super::environments::EnvironmentRegistry;
use crate::domain::{
    AssetDelta, AssetRef, AssetSnapshot, AssetType, DeployedAsset, EnvironmentDiff, EnvironmentId,
    PromotionRecord, PromotionRequest, PromotionStatus,
};
use crate::storage::{document_key, Collection, Store};

/// Promotion validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromotionError {
    #[error("Cannot promote from {from} to {to}: destination must be later in dev → qa → uat → prod")]
    InvalidEnvironmentOrder { from: EnvironmentId, to: EnvironmentId },
}

/// Destinations that are approved and deployed without review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApprovalPolicy {
    pub auto_approve: BTreeSet<EnvironmentId>,
}

impl Default for AutoApprovalPolicy {
    fn default() -> Self {
        Self {
            auto_approve: BTreeSet::from([EnvironmentId::Qa]),
        }
    }
}

impl AutoApprovalPolicy {
    pub fn new(environments: impl IntoIterator<Item = EnvironmentId>) -> Self {
        Self {
            auto_approve: environments.into_iter().collect(),
        }
    }

    /// Every promotion waits for review
    pub fn manual() -> Self {
        Self::new([])
    }

    pub fn auto_approves(&self, env: EnvironmentId) -> bool {
        self.auto_approve.contains(&env)
    }
}

/// Criteria for listing promotions; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct PromotionFilter {
    pub status: Option<PromotionStatus>,
    pub asset_type: Option<AssetType>,
    pub asset_id: Option<String>,
    pub to_env: Option<EnvironmentId>,
}

impl PromotionFilter {
    fn matches(&self, record: &PromotionRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self.asset_type.map_or(true, |t| record.asset_type == t)
            && self.asset_id.as_ref().map_or(true, |id| &record.asset_id == id)
            && self.to_env.map_or(true, |env| record.to_env == env)
    }
}

fn promotion_key(tenant_id: &str, id: Uuid) -> String {
    document_key(&[tenant_id, id.to_string().as_str()])
}

fn deployment_key(tenant_id: &str, env: EnvironmentId, asset_type: AssetType, asset_id: &str) -> String {
    document_key(&[tenant_id, env.as_str(), asset_type.as_str(), asset_id])
}

/// The promotion state machine
pub struct PromotionWorkflow {
    store: Arc<Store>,
    registry: Arc<EnvironmentRegistry>,
    policy: AutoApprovalPolicy,
    /// Serializes transitions so a record is never resolved twice
    write_lock: Mutex<()>,
}

impl PromotionWorkflow {
    pub fn new(store: Arc<Store>, registry: Arc<EnvironmentRegistry>, policy: AutoApprovalPolicy) -> Self {
        Self {
            store,
            registry,
            policy,
            write_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &AutoApprovalPolicy {
        &self.policy
    }

    /// Capture a snapshot, diff it against the deployed one and open a promotion
    pub fn request_promotion(
        &self,
        tenant_id: &str,
        request: PromotionRequest,
    ) -> Result<PromotionRecord, PromotionError> {
        if request.to_env.index() <= request.from_env.index() {
            return Err(PromotionError::InvalidEnvironmentOrder {
                from: request.from_env,
                to: request.to_env,
            });
        }

        self.registry.ensure_environments(tenant_id);
        let _guard = self.write_lock.lock();

        let version = request.to_version.unwrap_or(request.from_version);
        let snapshot = AssetSnapshot::capture(request.asset_type, &request.asset_id, version, request.config);

        let deployed = self.load_deployment(tenant_id, request.to_env, request.asset_type, &request.asset_id);
        let diff = snapshot_diff(deployed.as_ref().map(|d| &d.snapshot), &snapshot);

        let mut record = PromotionRecord {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            asset_type: request.asset_type,
            asset_id: request.asset_id,
            asset_name: request.asset_name,
            from_env: request.from_env,
            to_env: request.to_env,
            from_version: request.from_version,
            to_version: version,
            status: PromotionStatus::Pending,
            requested_by: request.requested_by,
            approved_by: None,
            rejected_by: None,
            rejection_reason: None,
            snapshot,
            diff,
            created_at: Utc::now(),
            resolved_at: None,
            deployed_at: None,
            metadata: BTreeMap::new(),
        };

        info!(
            promotion_id = %record.id,
            tenant = tenant_id,
            asset = %record.asset_id,
            from = %record.from_env,
            to = %record.to_env,
            checksum = %record.snapshot.checksum,
            "Promotion requested"
        );

        if self.policy.auto_approves(record.to_env) {
            let approver = record.requested_by.clone();
            self.approve_and_deploy(&mut record, &approver);
        } else {
            self.save(&record);
        }

        Ok(record)
    }

    /// Approve and deploy a pending promotion
    pub fn approve_promotion(&self, tenant_id: &str, id: Uuid, approved_by: &str) -> Option<PromotionRecord> {
        let _guard = self.write_lock.lock();
        let mut record = self.get_promotion(tenant_id, id)?;

        if record.status != PromotionStatus::Pending {
            warn!(promotion_id = %id, status = %record.status, "Only pending promotions can be approved");
            return None;
        }

        self.approve_and_deploy(&mut record, approved_by);
        Some(record)
    }

    /// Reject a pending promotion (terminal)
    pub fn reject_promotion(
        &self,
        tenant_id: &str,
        id: Uuid,
        rejected_by: &str,
        reason: Option<String>,
    ) -> Option<PromotionRecord> {
        let _guard = self.write_lock.lock();
        let mut record = self.get_promotion(tenant_id, id)?;

        if record.status != PromotionStatus::Pending {
            warn!(promotion_id = %id, status = %record.status, "Only pending promotions can be rejected");
            return None;
        }

        record.status = PromotionStatus::Rejected;
        record.rejected_by = Some(rejected_by.to_string());
        record.rejection_reason = reason;
        record.resolved_at = Some(Utc::now());
        self.save(&record);

        info!(promotion_id = %id, rejected_by, "Promotion rejected");
        Some(record)
    }

    /// Roll back a deployed promotion.
    ///
    /// The destination's deployment is removed only while this promotion is
    /// still the one that produced it.
    pub fn rollback_promotion(&self, tenant_id: &str, id: Uuid, rolled_back_by: &str) -> Option<PromotionRecord> {
        let _guard = self.write_lock.lock();
        let mut record = self.get_promotion(tenant_id, id)?;

        if record.status != PromotionStatus::Deployed {
            warn!(promotion_id = %id, status = %record.status, "Only deployed promotions can be rolled back");
            return None;
        }

        let key = deployment_key(tenant_id, record.to_env, record.asset_type, &record.asset_id);
        match self.load_deployment(tenant_id, record.to_env, record.asset_type, &record.asset_id) {
            Some(current) if current.promotion_id == record.id => {
                self.store.delete(Collection::Deployments, &key);
            }
            Some(current) => {
                warn!(
                    promotion_id = %id,
                    deployed_promotion = %current.promotion_id,
                    "Newer deployment kept; rollback only updates the record"
                );
            }
            None => {}
        }

        let now = Utc::now();
        record.status = PromotionStatus::RolledBack;
        record
            .metadata
            .insert("rolled_back_by".to_string(), rolled_back_by.to_string());
        record
            .metadata
            .insert("rolled_back_at".to_string(), now.to_rfc3339());
        self.save(&record);

        info!(promotion_id = %id, rolled_back_by, "Promotion rolled back");
        Some(record)
    }

    pub fn get_promotion(&self, tenant_id: &str, id: Uuid) -> Option<PromotionRecord> {
        self.store
            .get::<PromotionRecord>(Collection::Promotions, &promotion_key(tenant_id, id))
            .filter(|record| record.tenant_id == tenant_id)
    }

    /// Promotions of a tenant, newest first
    pub fn list_promotions(&self, tenant_id: &str, filter: &PromotionFilter) -> Vec<PromotionRecord> {
        let mut records: Vec<PromotionRecord> = self
            .store
            .list::<PromotionRecord>(Collection::Promotions)
            .into_iter()
            .filter(|r| r.tenant_id == tenant_id && filter.matches(r))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// The snapshot currently deployed for an asset
    pub fn deployed_snapshot(
        &self,
        tenant_id: &str,
        env: EnvironmentId,
        asset_type: AssetType,
        asset_id: &str,
    ) -> Option<AssetSnapshot> {
        self.load_deployment(tenant_id, env, asset_type, asset_id)
            .map(|d| d.snapshot)
    }

    /// Every asset deployed in an environment, sorted by type then id
    pub fn deployed_assets(
        &self,
        tenant_id: &str,
        env: EnvironmentId,
        asset_type: Option<AssetType>,
    ) -> Vec<DeployedAsset> {
        let mut assets: Vec<DeployedAsset> = self
            .store
            .list::<DeployedAsset>(Collection::Deployments)
            .into_iter()
            .filter(|d| {
                d.tenant_id == tenant_id
                    && d.environment == env
                    && asset_type.map_or(true, |t| d.snapshot.asset_type == t)
            })
            .collect();
        assets.sort_by(|a, b| {
            (a.snapshot.asset_type, &a.snapshot.asset_id).cmp(&(b.snapshot.asset_type, &b.snapshot.asset_id))
        });
        assets
    }

    /// Compare what is deployed in two environments
    pub fn diff_environments(
        &self,
        tenant_id: &str,
        env_a: EnvironmentId,
        env_b: EnvironmentId,
        asset_type: Option<AssetType>,
    ) -> EnvironmentDiff {
        let index = |env| -> BTreeMap<(AssetType, String), DeployedAsset> {
            self.deployed_assets(tenant_id, env, asset_type)
                .into_iter()
                .map(|d| ((d.snapshot.asset_type, d.snapshot.asset_id.clone()), d))
                .collect()
        };
        let in_a = index(env_a);
        let in_b = index(env_b);

        let mut diff = EnvironmentDiff {
            env_a,
            env_b,
            only_in_a: Vec::new(),
            only_in_b: Vec::new(),
            different: Vec::new(),
            identical_count: 0,
        };

        for (key, a) in &in_a {
            match in_b.get(key) {
                None => diff.only_in_a.push(AssetRef::from(a)),
                Some(b) if a.snapshot.checksum == b.snapshot.checksum => diff.identical_count += 1,
                Some(b) => diff.different.push(AssetDelta {
                    asset_type: a.snapshot.asset_type,
                    asset_id: a.snapshot.asset_id.clone(),
                    version_a: a.snapshot.version,
                    version_b: b.snapshot.version,
                    checksum_a: a.snapshot.checksum.clone(),
                    checksum_b: b.snapshot.checksum.clone(),
                }),
            }
        }
        diff.only_in_b = in_b
            .iter()
            .filter(|(key, _)| !in_a.contains_key(*key))
            .map(|(_, b)| AssetRef::from(b))
            .collect();

        diff
    }

    fn approve_and_deploy(&self, record: &mut PromotionRecord, approved_by: &str) {
        let now = Utc::now();
        record.status = PromotionStatus::Approved;
        record.approved_by = Some(approved_by.to_string());
        record.resolved_at = Some(now);

        let deployment = DeployedAsset {
            tenant_id: record.tenant_id.clone(),
            environment: record.to_env,
            asset_name: record.asset_name.clone(),
            snapshot: record.snapshot.clone(),
            promotion_id: record.id,
            deployed_by: approved_by.to_string(),
            deployed_at: now,
        };
        self.store.put(
            Collection::Deployments,
            &deployment_key(&record.tenant_id, record.to_env, record.asset_type, &record.asset_id),
            &deployment,
        );

        record.status = PromotionStatus::Deployed;
        record.deployed_at = Some(now);
        self.save(record);

        info!(
            promotion_id = %record.id,
            env = %record.to_env,
            version = record.to_version,
            approved_by,
            "Promotion deployed"
        );
    }

    fn load_deployment(
        &self,
        tenant_id: &str,
        env: EnvironmentId,
        asset_type: AssetType,
        asset_id: &str,
    ) -> Option<DeployedAsset> {
        self.store
            .get::<DeployedAsset>(Collection::Deployments, &deployment_key(tenant_id, env, asset_type, asset_id))
            .filter(|d| {
                d.tenant_id == tenant_id
                    && d.environment == env
                    && d.snapshot.asset_type == asset_type
                    && d.snapshot.asset_id == asset_id
            })
    }

    fn save(&self, record: &PromotionRecord) {
        self.store.put(
            Collection::Promotions,
            &promotion_key(&record.tenant_id, record.id),
            record,
        );
    }
}
