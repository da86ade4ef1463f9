//! Command-line interface for agentplane.
//!
//! Provides commands for managing and running pipelines, inspecting runs,
//! managing environments and promotions, and reporting usage.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{AgentInvoker, CommandInvoker, HttpInvoker};
use crate::config::{self, AgentBackend, AgentSettings, ResolvedConfig};
use crate::core::{
    AutoApprovalPolicy, EnvironmentRegistry, Orchestrator, PipelineCatalog, PromotionWorkflow,
    RunHistory, UsageMeter,
};
use crate::domain::PipelineRun;
use crate::storage::Store;

pub mod env;
pub mod pipeline;
pub mod promote;
pub mod usage;

/// agentplane - Multi-tenant control plane for LLM agents
#[derive(Parser, Debug)]
#[command(name = "agentplane")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Tenant the command acts on
    #[arg(long, global = true, env = "AGENTPLANE_TENANT", default_value = "default")]
    pub tenant: String,

    /// Name recorded as the acting user
    #[arg(long, global = true, env = "AGENTPLANE_ACTOR", default_value = "cli")]
    pub actor: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage and run pipelines
    Pipeline {
        #[command(subcommand)]
        command: pipeline::PipelineCommands,
    },

    /// List recent runs
    Runs {
        /// Only runs of this pipeline
        #[arg(short, long)]
        pipeline: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Check the status of a run
    Status {
        /// Run ID (UUID)
        run_id: String,
    },

    /// Manage environments and their variables
    Env {
        #[command(subcommand)]
        command: env::EnvCommands,
    },

    /// Promote assets between environments
    Promote {
        #[command(subcommand)]
        command: promote::PromoteCommands,
    },

    /// Report metered usage
    Usage {
        #[command(subcommand)]
        command: usage::UsageCommands,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Engines wired over the configured store
pub struct App {
    pub config: ResolvedConfig,
    pub store: Arc<Store>,
    pub catalog: Arc<PipelineCatalog>,
    pub history: RunHistory,
    pub registry: Arc<EnvironmentRegistry>,
    pub promotions: PromotionWorkflow,
    pub meter: UsageMeter,
}

impl App {
    /// Open storage and build every engine from `config`
    pub fn open(config: ResolvedConfig) -> Self {
        let store = Arc::new(Store::open(&config.storage));
        let catalog = Arc::new(PipelineCatalog::new(Arc::clone(&store)));
        let history = RunHistory::new(Arc::clone(&store));
        let registry = Arc::new(EnvironmentRegistry::new(Arc::clone(&store)));
        let promotions = PromotionWorkflow::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            AutoApprovalPolicy::new(config.auto_approve.iter().copied()),
        );
        let meter = UsageMeter::with_pricing(Arc::clone(&store), &config.pricing);

        Self {
            config,
            store,
            catalog,
            history,
            registry,
            promotions,
            meter,
        }
    }

    /// An orchestrator using the configured agent backend
    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let invoker = build_invoker(&self.config.agents)?;
        Ok(Orchestrator::new(Arc::clone(&self.catalog), self.history.clone(), invoker)
            .with_limits(self.config.execution.clone()))
    }
}

/// Build the agent invoker described by `settings`
pub fn build_invoker(settings: &AgentSettings) -> Result<Arc<dyn AgentInvoker>> {
    match settings.backend {
        AgentBackend::Command => Ok(Arc::new(
            CommandInvoker::new(settings.command.clone()).with_args(settings.args.clone()),
        )),
        AgentBackend::Http => {
            let base_url = settings
                .base_url
                .clone()
                .context("agents.base_url is required for the http backend")?;
            Ok(Arc::new(HttpInvoker::new(base_url, settings.token.clone())))
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let app = App::open(config::config()?.clone());

        match self.command {
            Commands::Pipeline { command } => pipeline::execute(&app, command).await,
            Commands::Runs { pipeline, limit } => list_runs(&app, pipeline.as_deref(), limit),
            Commands::Status { run_id } => show_status(&app, &run_id),
            Commands::Env { command } => env::execute(&app, &self.tenant, &self.actor, command),
            Commands::Promote { command } => promote::execute(&app, &self.tenant, &self.actor, command),
            Commands::Usage { command } => usage::execute(&app, command),
            Commands::Config => show_config(&app),
        }
    }
}

/// Parse a UUID argument
pub(crate) fn parse_id(kind: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid {} ID: {}", kind, value))
}

/// Print a JSON document to stdout
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// List recent runs
fn list_runs(app: &App, pipeline: Option<&str>, limit: usize) -> Result<()> {
    let runs = match pipeline {
        Some(id) => app.history.list_for_pipeline(parse_id("pipeline", id)?, limit),
        None => app.history.list_recent(limit),
    };

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<10} {:<8} {:<10}", "RUN ID", "PIPELINE", "STATUS", "STEPS", "COST");
    println!("{}", "-".repeat(90));

    for run in runs {
        println!(
            "{:<38} {:<20} {:<10} {:<8} ${:<9.4}",
            run.id,
            run.pipeline_name,
            run.status.as_str(),
            format!("{}/{}", run.steps_completed, run.steps_total),
            run.total_cost_usd
        );
    }

    Ok(())
}

/// Show the status of a run
fn show_status(app: &App, run_id: &str) -> Result<()> {
    let run_id = parse_id("run", run_id)?;
    let run = app
        .history
        .get(run_id)
        .with_context(|| format!("Run not found: {}", run_id))?;

    print_run(&run);
    Ok(())
}

pub(crate) fn print_run(run: &PipelineRun) {
    println!("Run ID: {}", run.id);
    println!("Pipeline: {} ({})", run.pipeline_name, run.pipeline_id);
    println!("Pattern: {}", run.pattern);
    println!("Status: {}", run.status.as_str());
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("Steps: {}/{}", run.steps_completed, run.steps_total);
    println!("Latency: {}ms", run.total_latency_ms);
    println!("Cost: ${:.4} ({} tokens)", run.total_cost_usd, run.total_tokens);
    if let Some(error) = &run.error {
        println!("Error: {}", error);
    }

    println!("\nStep results:");
    for result in &run.step_results {
        let detail = result.error.as_deref().unwrap_or("");
        println!(
            "  {:<20} {:<20} {:<10} {:>6}ms x{} {}",
            result.step_id,
            result.agent_id,
            if result.is_success() { "completed" } else { "failed" },
            result.latency_ms,
            result.attempts,
            detail
        );
    }
}

/// Show configuration
fn show_config(app: &App) -> Result<()> {
    let cfg = &app.config;

    println!("agentplane configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Database: {}", cfg.storage.path.display());
    println!();
    println!("Storage:");
    println!("  Configured: {}", cfg.storage.backend);
    println!("  Active:     {}", app.store.backend_name());
    println!();
    println!("Execution limits:");
    println!("  Max concurrent steps: {}", cfg.execution.max_concurrent_steps);
    println!("  Default step timeout: {}s", cfg.execution.default_step_timeout_seconds);
    println!(
        "  Retry delay:          {}ms (max {}ms, x{})",
        cfg.execution.retry_initial_delay_ms,
        cfg.execution.retry_max_delay_ms,
        cfg.execution.retry_backoff_multiplier
    );
    println!();
    println!("Promotion:");
    let auto: Vec<&str> = cfg.auto_approve.iter().map(|e| e.as_str()).collect();
    println!("  Auto-approve: {}", if auto.is_empty() { "(none)".to_string() } else { auto.join(", ") });
    println!();
    println!("Agents:");
    match cfg.agents.backend {
        AgentBackend::Command => println!("  Command: {} {}", cfg.agents.command, cfg.agents.args.join(" ")),
        AgentBackend::Http => println!(
            "  HTTP:    {} (token: {})",
            cfg.agents.base_url.as_deref().unwrap_or("(unset)"),
            if cfg.agents.token.is_some() { "set" } else { "unset" }
        ),
    }
    println!();
    println!("Pricing overrides: {}", cfg.pricing.len());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "agentplane",
            "env",
            "lock",
            "prod",
            "--tenant",
            "acme",
            "--actor",
            "alice",
        ])
        .unwrap();

        assert_eq!(cli.tenant, "acme");
        assert_eq!(cli.actor, "alice");
        assert!(matches!(cli.command, Commands::Env { .. }));
    }

    #[test]
    fn test_http_backend_requires_base_url() {
        let settings = AgentSettings {
            backend: AgentBackend::Http,
            ..Default::default()
        };
        assert!(build_invoker(&settings).is_err());

        let settings = AgentSettings {
            backend: AgentBackend::Http,
            base_url: Some("http://agents.local".to_string()),
            ..Default::default()
        };
        assert_eq!(build_invoker(&settings).unwrap().name(), "http");
    }
}
