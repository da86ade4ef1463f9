//! Promotion Workflow Integration Tests
//!
//! The dev → qa → uat → prod ladder: auto-approval, manual review,
//! rollback and environment comparison.

use std::sync::Arc;

use agentplane::core::{
    AutoApprovalPolicy, EnvironmentRegistry, PromotionError, PromotionFilter, PromotionWorkflow,
};
use agentplane::domain::{
    AssetType, EnvironmentId, PromotionRequest, PromotionStatus, SnapshotDiff,
};
use agentplane::storage::Store;
use serde_json::{json, Value};

const TENANT: &str = "acme";

fn workflow() -> PromotionWorkflow {
    let store = Arc::new(Store::in_memory());
    let registry = Arc::new(EnvironmentRegistry::new(Arc::clone(&store)));
    PromotionWorkflow::new(store, registry, AutoApprovalPolicy::default())
}

fn request(asset_id: &str, from: EnvironmentId, to: EnvironmentId, config: Value) -> PromotionRequest {
    PromotionRequest::new(AssetType::Agent, asset_id, from, to, config, "alice")
}

#[test]
fn test_dev_to_qa_deploys_without_approval() {
    let wf = workflow();

    let record = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({"temp": 0.3})))
        .unwrap();

    assert_eq!(record.status, PromotionStatus::Deployed);
    assert_eq!(record.approved_by.as_deref(), Some("alice"));
    assert!(record.deployed_at.is_some());
    assert!(matches!(record.diff, SnapshotDiff::New { .. }));

    let deployed = wf
        .deployed_snapshot(TENANT, EnvironmentId::Qa, AssetType::Agent, "a1")
        .unwrap();
    assert_eq!(deployed.checksum, record.snapshot.checksum);
}

#[test]
fn test_repeat_promotion_reports_changed_keys() {
    let wf = workflow();

    wf.request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({"temp": 0.3})))
        .unwrap();
    let second = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({"temp": 0.5})))
        .unwrap();

    assert_eq!(second.diff.changed_keys(), ["temp".to_string()]);
    assert!(second.diff.added_keys().is_empty());
    assert!(second.diff.removed_keys().is_empty());

    // The newer snapshot replaced the older one
    let deployed = wf
        .deployed_snapshot(TENANT, EnvironmentId::Qa, AssetType::Agent, "a1")
        .unwrap();
    assert_eq!(deployed.config, json!({"temp": 0.5}));
}

#[test]
fn test_identical_payload_diffs_empty() {
    let wf = workflow();
    let config = json!({"model": "gpt-4o", "tools": ["search"]});

    wf.request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, config.clone()))
        .unwrap();
    let again = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, config))
        .unwrap();

    assert!(again.diff.changed_keys().is_empty());
    assert!(again.diff.added_keys().is_empty());
    assert!(again.diff.removed_keys().is_empty());
    assert!(again.diff.is_unchanged());
}

#[test]
fn test_qa_to_uat_waits_for_approval() {
    let wf = workflow();

    let pending = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Qa, EnvironmentId::Uat, json!({"x": 1})))
        .unwrap();
    assert_eq!(pending.status, PromotionStatus::Pending);
    assert!(wf
        .deployed_snapshot(TENANT, EnvironmentId::Uat, AssetType::Agent, "a1")
        .is_none());

    let approved = wf.approve_promotion(TENANT, pending.id, "bob").unwrap();
    assert_eq!(approved.status, PromotionStatus::Deployed);
    assert_eq!(approved.approved_by.as_deref(), Some("bob"));
    assert!(wf
        .deployed_snapshot(TENANT, EnvironmentId::Uat, AssetType::Agent, "a1")
        .is_some());

    // Already resolved
    assert!(wf.approve_promotion(TENANT, pending.id, "bob").is_none());
    assert!(wf.reject_promotion(TENANT, pending.id, "bob", None).is_none());
}

#[test]
fn test_reject_is_terminal() {
    let wf = workflow();

    let pending = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Uat, EnvironmentId::Prod, json!({"x": 1})))
        .unwrap();

    let rejected = wf
        .reject_promotion(TENANT, pending.id, "carol", Some("missing eval results".to_string()))
        .unwrap();
    assert_eq!(rejected.status, PromotionStatus::Rejected);
    assert_eq!(rejected.rejected_by.as_deref(), Some("carol"));
    assert_eq!(rejected.rejection_reason.as_deref(), Some("missing eval results"));
    assert!(rejected.resolved_at.is_some());

    // A second reject is a no-op
    assert!(wf.reject_promotion(TENANT, pending.id, "carol", None).is_none());
    assert!(wf.approve_promotion(TENANT, pending.id, "carol").is_none());
    assert_eq!(
        wf.get_promotion(TENANT, pending.id).unwrap().status,
        PromotionStatus::Rejected
    );
}

#[test]
fn test_backwards_promotion_is_rejected_without_records() {
    let wf = workflow();

    let err = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Prod, EnvironmentId::Dev, json!({})))
        .unwrap_err();
    assert_eq!(
        err,
        PromotionError::InvalidEnvironmentOrder {
            from: EnvironmentId::Prod,
            to: EnvironmentId::Dev,
        }
    );

    // Same-environment promotions are not allowed either
    assert!(wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Qa, EnvironmentId::Qa, json!({})))
        .is_err());

    assert!(wf.list_promotions(TENANT, &PromotionFilter::default()).is_empty());
}

#[test]
fn test_rollback_only_applies_to_deployed() {
    let wf = workflow();

    let pending = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Qa, EnvironmentId::Uat, json!({"x": 1})))
        .unwrap();
    assert!(wf.rollback_promotion(TENANT, pending.id, "dave").is_none());
    assert_eq!(
        wf.get_promotion(TENANT, pending.id).unwrap().status,
        PromotionStatus::Pending
    );

    wf.reject_promotion(TENANT, pending.id, "dave", None).unwrap();
    assert!(wf.rollback_promotion(TENANT, pending.id, "dave").is_none());
    assert_eq!(
        wf.get_promotion(TENANT, pending.id).unwrap().status,
        PromotionStatus::Rejected
    );
}

#[test]
fn test_rollback_removes_deployment() {
    let wf = workflow();

    let deployed = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({"x": 1})))
        .unwrap();

    let rolled_back = wf.rollback_promotion(TENANT, deployed.id, "erin").unwrap();
    assert_eq!(rolled_back.status, PromotionStatus::RolledBack);
    assert_eq!(rolled_back.metadata.get("rolled_back_by").map(String::as_str), Some("erin"));
    assert!(rolled_back.metadata.contains_key("rolled_back_at"));
    assert!(wf
        .deployed_snapshot(TENANT, EnvironmentId::Qa, AssetType::Agent, "a1")
        .is_none());

    // Only once
    assert!(wf.rollback_promotion(TENANT, deployed.id, "erin").is_none());
}

#[test]
fn test_rollback_of_superseded_promotion_keeps_newer_deployment() {
    let wf = workflow();

    let first = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({"v": 1})))
        .unwrap();
    wf.request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({"v": 2})))
        .unwrap();

    let rolled_back = wf.rollback_promotion(TENANT, first.id, "erin").unwrap();
    assert_eq!(rolled_back.status, PromotionStatus::RolledBack);

    let deployed = wf
        .deployed_snapshot(TENANT, EnvironmentId::Qa, AssetType::Agent, "a1")
        .unwrap();
    assert_eq!(deployed.config, json!({"v": 2}));
}

#[test]
fn test_rollback_of_superseded_identical_promotion_keeps_newer_deployment() {
    let wf = workflow();
    let config = json!({"temp": 0.3});

    let first = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, config.clone()))
        .unwrap();
    let second = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, config))
        .unwrap();
    assert_eq!(first.snapshot.checksum, second.snapshot.checksum);

    wf.rollback_promotion(TENANT, first.id, "erin").unwrap();

    let deployed = wf.deployed_assets(TENANT, EnvironmentId::Qa, None);
    assert_eq!(deployed.len(), 1);
    assert_eq!(deployed[0].promotion_id, second.id);
    assert_eq!(
        wf.get_promotion(TENANT, second.id).unwrap().status,
        PromotionStatus::Deployed
    );
}

#[test]
fn test_colon_heavy_ids_do_not_cross_tenants() {
    let wf = workflow();
    let other = "x:qa:agent:a";

    wf.request_promotion(
        "x",
        request("a:uat:agent:b", EnvironmentId::Dev, EnvironmentId::Qa, json!({"owner": "x"})),
    )
    .unwrap();

    let pending = wf
        .request_promotion(other, request("b", EnvironmentId::Qa, EnvironmentId::Uat, json!({"owner": "other"})))
        .unwrap();
    assert!(matches!(pending.diff, SnapshotDiff::New { .. }));
    wf.approve_promotion(other, pending.id, "bob").unwrap();

    let x_qa = wf.deployed_assets("x", EnvironmentId::Qa, None);
    assert_eq!(x_qa.len(), 1);
    assert_eq!(x_qa[0].snapshot.config, json!({"owner": "x"}));
    assert_eq!(wf.deployed_assets(other, EnvironmentId::Uat, None).len(), 1);
    assert!(wf.deployed_assets("x", EnvironmentId::Uat, None).is_empty());
}

#[test]
fn test_manual_policy_holds_qa() {
    let store = Arc::new(Store::in_memory());
    let registry = Arc::new(EnvironmentRegistry::new(Arc::clone(&store)));
    let wf = PromotionWorkflow::new(store, registry, AutoApprovalPolicy::manual());

    let record = wf
        .request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({})))
        .unwrap();
    assert_eq!(record.status, PromotionStatus::Pending);
}

#[test]
fn test_requests_provision_environments() {
    let store = Arc::new(Store::in_memory());
    let registry = Arc::new(EnvironmentRegistry::new(Arc::clone(&store)));
    let wf = PromotionWorkflow::new(store, Arc::clone(&registry), AutoApprovalPolicy::default());

    wf.request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({})))
        .unwrap();

    assert_eq!(registry.list_environments(TENANT).len(), 4);
}

#[test]
fn test_list_filters_and_tenant_isolation() {
    let wf = workflow();

    wf.request_promotion(TENANT, request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({})))
        .unwrap();
    wf.request_promotion(TENANT, request("a2", EnvironmentId::Qa, EnvironmentId::Uat, json!({})))
        .unwrap();
    wf.request_promotion("globex", request("a3", EnvironmentId::Dev, EnvironmentId::Qa, json!({})))
        .unwrap();

    assert_eq!(wf.list_promotions(TENANT, &PromotionFilter::default()).len(), 2);

    let pending = wf.list_promotions(
        TENANT,
        &PromotionFilter {
            status: Some(PromotionStatus::Pending),
            ..Default::default()
        },
    );
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].asset_id, "a2");

    let into_qa = wf.list_promotions(
        TENANT,
        &PromotionFilter {
            to_env: Some(EnvironmentId::Qa),
            ..Default::default()
        },
    );
    assert_eq!(into_qa.len(), 1);
    assert_eq!(into_qa[0].asset_id, "a1");

    // Records of one tenant are invisible to another
    let other = wf.list_promotions("globex", &PromotionFilter::default());
    assert_eq!(other.len(), 1);
    assert!(wf.get_promotion(TENANT, other[0].id).is_none());
}

#[test]
fn test_diff_environments() {
    let store = Arc::new(Store::in_memory());
    let registry = Arc::new(EnvironmentRegistry::new(Arc::clone(&store)));
    let auto_uat =
        PromotionWorkflow::new(store, registry, AutoApprovalPolicy::new([EnvironmentId::Qa, EnvironmentId::Uat]));

    // Same content in both: in sync
    auto_uat
        .request_promotion(TENANT, request("shared", EnvironmentId::Dev, EnvironmentId::Qa, json!({"v": 1})))
        .unwrap();
    auto_uat
        .request_promotion(TENANT, request("shared", EnvironmentId::Qa, EnvironmentId::Uat, json!({"v": 1})))
        .unwrap();
    auto_uat
        .request_promotion(TENANT, request("drift", EnvironmentId::Dev, EnvironmentId::Qa, json!({"v": 2})))
        .unwrap();
    auto_uat
        .request_promotion(TENANT, request("drift", EnvironmentId::Qa, EnvironmentId::Uat, json!({"v": 1})))
        .unwrap();
    auto_uat
        .request_promotion(TENANT, request("qa-only", EnvironmentId::Dev, EnvironmentId::Qa, json!({})))
        .unwrap();

    let diff = auto_uat.diff_environments(TENANT, EnvironmentId::Qa, EnvironmentId::Uat, None);

    assert_eq!(diff.identical_count, 1);
    assert_eq!(diff.different.len(), 1);
    assert_eq!(diff.different[0].asset_id, "drift");
    assert_eq!(diff.only_in_a.len(), 1);
    assert_eq!(diff.only_in_a[0].asset_id, "qa-only");
    assert!(diff.only_in_b.is_empty());

    // Filtering by a type with no deployments yields an empty comparison
    let prompts = auto_uat.diff_environments(TENANT, EnvironmentId::Qa, EnvironmentId::Uat, Some(AssetType::Prompt));
    assert_eq!(prompts.identical_count, 0);
    assert!(prompts.different.is_empty());
}

#[test]
fn test_versions_follow_the_request() {
    let wf = workflow();

    let record = wf
        .request_promotion(
            TENANT,
            request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({})).with_versions(3, None),
        )
        .unwrap();
    assert_eq!(record.from_version, 3);
    assert_eq!(record.to_version, 3);
    assert_eq!(record.snapshot.version, 3);

    let bumped = wf
        .request_promotion(
            TENANT,
            request("a1", EnvironmentId::Dev, EnvironmentId::Qa, json!({})).with_versions(3, Some(4)),
        )
        .unwrap();
    assert_eq!(bumped.to_version, 4);
    assert_eq!(
        wf.deployed_assets(TENANT, EnvironmentId::Qa, None)[0].snapshot.version,
        4
    );
}
