//! Promotion CLI subcommands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use serde_json::Value;

use super::{parse_id, print_json, App};
use crate::core::PromotionFilter;
use crate::domain::{AssetType, EnvironmentId, PromotionRecord, PromotionRequest, PromotionStatus, SnapshotDiff};

#[derive(Subcommand, Debug)]
pub enum PromoteCommands {
    /// Request a promotion of an asset to a later environment
    Request {
        /// agent, tool, prompt or pipeline
        asset_type: AssetType,

        asset_id: String,

        /// Source environment
        from: EnvironmentId,

        /// Destination environment
        to: EnvironmentId,

        /// JSON file with the asset configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Display name (defaults to the asset id)
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "1")]
        from_version: u32,

        #[arg(long)]
        to_version: Option<u32>,
    },

    /// Approve and deploy a pending promotion
    Approve { promotion_id: String },

    /// Reject a pending promotion
    Reject {
        promotion_id: String,

        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Roll back a deployed promotion
    Rollback { promotion_id: String },

    /// List promotions
    List {
        #[arg(short, long, value_enum)]
        status: Option<StatusArg>,

        /// Only promotions into this environment
        #[arg(long)]
        to: Option<EnvironmentId>,

        #[arg(long)]
        asset_id: Option<String>,
    },

    /// Show a promotion record
    Show { promotion_id: String },

    /// Compare the deployed assets of two environments
    Diff {
        env_a: EnvironmentId,
        env_b: EnvironmentId,

        #[arg(long)]
        asset_type: Option<AssetType>,
    },

    /// List the assets deployed in an environment
    Deployed {
        env: EnvironmentId,

        #[arg(long)]
        asset_type: Option<AssetType>,
    },
}

/// Promotion status for CLI (maps to PromotionStatus)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Pending,
    Approved,
    Rejected,
    Deployed,
    RolledBack,
}

impl From<StatusArg> for PromotionStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Pending => PromotionStatus::Pending,
            StatusArg::Approved => PromotionStatus::Approved,
            StatusArg::Rejected => PromotionStatus::Rejected,
            StatusArg::Deployed => PromotionStatus::Deployed,
            StatusArg::RolledBack => PromotionStatus::RolledBack,
        }
    }
}

pub fn execute(app: &App, tenant: &str, actor: &str, command: PromoteCommands) -> Result<()> {
    let workflow = &app.promotions;

    match command {
        PromoteCommands::Request {
            asset_type,
            asset_id,
            from,
            to,
            config,
            name,
            from_version,
            to_version,
        } => {
            let content = std::fs::read_to_string(&config)
                .with_context(|| format!("Failed to read config file: {}", config.display()))?;
            let payload: Value = serde_json::from_str(&content)
                .with_context(|| format!("Config file is not valid JSON: {}", config.display()))?;

            let mut request = PromotionRequest::new(asset_type, asset_id, from, to, payload, actor)
                .with_versions(from_version, to_version);
            if let Some(name) = name {
                request = request.with_name(name);
            }

            let record = workflow.request_promotion(tenant, request)?;
            print_summary(&record);
            Ok(())
        }
        PromoteCommands::Approve { promotion_id } => {
            let id = parse_id("promotion", &promotion_id)?;
            let record = workflow
                .approve_promotion(tenant, id, actor)
                .ok_or_else(|| refusal(workflow.get_promotion(tenant, id).as_ref(), &promotion_id, "approve", "pending"))?;
            print_summary(&record);
            Ok(())
        }
        PromoteCommands::Reject { promotion_id, reason } => {
            let id = parse_id("promotion", &promotion_id)?;
            let record = workflow
                .reject_promotion(tenant, id, actor, reason)
                .ok_or_else(|| refusal(workflow.get_promotion(tenant, id).as_ref(), &promotion_id, "reject", "pending"))?;
            print_summary(&record);
            Ok(())
        }
        PromoteCommands::Rollback { promotion_id } => {
            let id = parse_id("promotion", &promotion_id)?;
            let record = workflow
                .rollback_promotion(tenant, id, actor)
                .ok_or_else(|| refusal(workflow.get_promotion(tenant, id).as_ref(), &promotion_id, "rollback", "deployed"))?;
            print_summary(&record);
            Ok(())
        }
        PromoteCommands::List { status, to, asset_id } => {
            let filter = PromotionFilter {
                status: status.map(Into::into),
                asset_type: None,
                asset_id,
                to_env: to,
            };
            let records = workflow.list_promotions(tenant, &filter);

            if records.is_empty() {
                println!("No promotions found");
                return Ok(());
            }

            println!(
                "{:<38} {:<9} {:<24} {:<11} {:<12} {:<12}",
                "ID", "TYPE", "ASSET", "ROUTE", "STATUS", "REQUESTED BY"
            );
            println!("{}", "-".repeat(110));
            for r in records {
                println!(
                    "{:<38} {:<9} {:<24} {:<11} {:<12} {:<12}",
                    r.id,
                    r.asset_type,
                    r.asset_name,
                    format!("{}→{}", r.from_env, r.to_env),
                    r.status,
                    r.requested_by
                );
            }
            Ok(())
        }
        PromoteCommands::Show { promotion_id } => {
            let id = parse_id("promotion", &promotion_id)?;
            let record = workflow
                .get_promotion(tenant, id)
                .with_context(|| format!("Promotion not found: {}", promotion_id))?;
            print_json(&record)
        }
        PromoteCommands::Diff { env_a, env_b, asset_type } => {
            let diff = workflow.diff_environments(tenant, env_a, env_b, asset_type);

            println!("{} vs {}: {} identical", diff.env_a, diff.env_b, diff.identical_count);
            for asset in &diff.only_in_a {
                println!("  only in {:<5} {} {} v{}", diff.env_a, asset.asset_type, asset.asset_id, asset.version);
            }
            for asset in &diff.only_in_b {
                println!("  only in {:<5} {} {} v{}", diff.env_b, asset.asset_type, asset.asset_id, asset.version);
            }
            for delta in &diff.different {
                println!(
                    "  different     {} {} v{} ({}) vs v{} ({})",
                    delta.asset_type, delta.asset_id, delta.version_a, delta.checksum_a, delta.version_b, delta.checksum_b
                );
            }
            Ok(())
        }
        PromoteCommands::Deployed { env, asset_type } => {
            let assets = workflow.deployed_assets(tenant, env, asset_type);
            if assets.is_empty() {
                println!("Nothing deployed in {}", env);
                return Ok(());
            }

            println!("{:<9} {:<24} {:<8} {:<18} {:<16}", "TYPE", "ASSET", "VERSION", "CHECKSUM", "DEPLOYED BY");
            println!("{}", "-".repeat(80));
            for a in assets {
                println!(
                    "{:<9} {:<24} {:<8} {:<18} {:<16}",
                    a.snapshot.asset_type, a.snapshot.asset_id, a.snapshot.version, a.snapshot.checksum, a.deployed_by
                );
            }
            Ok(())
        }
    }
}

/// Why a transition on `id` did nothing
fn refusal(record: Option<&PromotionRecord>, id: &str, action: &str, expected: &str) -> anyhow::Error {
    match record {
        None => anyhow::anyhow!("Promotion not found: {}", id),
        Some(r) if r.status.is_terminal() => {
            anyhow::anyhow!("Cannot {} promotion {}: it is {} and can no longer change", action, id, r.status)
        }
        Some(r) => anyhow::anyhow!("Cannot {} promotion {}: it is {}, not {}", action, id, r.status, expected),
    }
}

fn print_summary(record: &PromotionRecord) {
    println!("Promotion: {}", record.id);
    println!(
        "Asset:     {} {} v{} ({} → {})",
        record.asset_type, record.asset_name, record.to_version, record.from_env, record.to_env
    );
    println!("Status:    {}", record.status);
    println!("Checksum:  {}", record.snapshot.checksum);

    match &record.diff {
        SnapshotDiff::New { .. } => println!("Diff:      new asset in {}", record.to_env),
        SnapshotDiff::Update {
            added_keys,
            removed_keys,
            changed_keys,
            previous_checksum,
            ..
        } => {
            println!("Diff:      against {}", previous_checksum);
            if !added_keys.is_empty() {
                println!("  added:   {}", added_keys.join(", "));
            }
            if !removed_keys.is_empty() {
                println!("  removed: {}", removed_keys.join(", "));
            }
            if !changed_keys.is_empty() {
                println!("  changed: {}", changed_keys.join(", "));
            }
        }
    }
}
