//! Pipeline CLI subcommands.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Subcommand, ValueEnum};
use serde_json::Value;

use super::{parse_id, print_json, print_run, App};
use crate::domain::{PipelineChanges, PipelineDraft, PipelineStatus, RunStatus, StateMap};

#[derive(Subcommand, Debug)]
pub enum PipelineCommands {
    /// Create a pipeline from a YAML definition
    Create {
        /// Pipeline definition file
        file: PathBuf,
    },

    /// List pipelines
    List {
        /// Only pipelines whose name or description contains this text
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Show a pipeline definition
    Show {
        /// Pipeline ID
        pipeline_id: String,

        /// Show a historical version
        #[arg(long)]
        version: Option<u32>,
    },

    /// List the stored versions of a pipeline
    Versions {
        /// Pipeline ID
        pipeline_id: String,
    },

    /// Change the lifecycle status of a pipeline
    UpdateStatus {
        /// Pipeline ID
        pipeline_id: String,

        #[arg(value_enum)]
        status: StatusArg,
    },

    /// Delete a pipeline and its history
    Delete {
        /// Pipeline ID
        pipeline_id: String,
    },

    /// Execute a pipeline
    Run {
        /// Pipeline ID
        pipeline_id: String,

        /// JSON object used as the initial state (reads stdin when piped)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Set a top-level state key (KEY=VALUE, VALUE parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
    },
}

/// Pipeline status for CLI (maps to PipelineStatus)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatusArg {
    Draft,
    Active,
    Paused,
    Archived,
}

impl From<StatusArg> for PipelineStatus {
    fn from(s: StatusArg) -> Self {
        match s {
            StatusArg::Draft => PipelineStatus::Draft,
            StatusArg::Active => PipelineStatus::Active,
            StatusArg::Paused => PipelineStatus::Paused,
            StatusArg::Archived => PipelineStatus::Archived,
        }
    }
}

pub async fn execute(app: &App, command: PipelineCommands) -> Result<()> {
    match command {
        PipelineCommands::Create { file } => {
            let draft = PipelineDraft::from_file(&file)?;
            let pipeline = app.catalog.create(draft)?;
            println!("Created pipeline {} ({}), version {}", pipeline.name, pipeline.id, pipeline.version);
            Ok(())
        }
        PipelineCommands::List { search } => {
            let pipelines = match search {
                Some(query) => app.catalog.search(&query),
                None => app.catalog.list(),
            };

            if pipelines.is_empty() {
                println!("No pipelines found");
                return Ok(());
            }

            println!("{:<38} {:<24} {:<12} {:<10} {:<8} {:<6}", "ID", "NAME", "PATTERN", "STATUS", "VERSION", "STEPS");
            println!("{}", "-".repeat(102));
            for p in pipelines {
                println!(
                    "{:<38} {:<24} {:<12} {:<10} {:<8} {:<6}",
                    p.id,
                    truncate(&p.name, 24),
                    p.pattern,
                    p.status,
                    p.version,
                    p.steps.len()
                );
            }
            Ok(())
        }
        PipelineCommands::Show { pipeline_id, version } => {
            let id = parse_id("pipeline", &pipeline_id)?;
            let pipeline = match version {
                Some(n) => app.catalog.version(id, n),
                None => app.catalog.get(id),
            }
            .with_context(|| format!("Pipeline not found: {}", pipeline_id))?;
            print_json(&pipeline)
        }
        PipelineCommands::Versions { pipeline_id } => {
            let id = parse_id("pipeline", &pipeline_id)?;
            let versions = app.catalog.versions(id);
            if versions.is_empty() {
                anyhow::bail!("Pipeline not found: {}", pipeline_id);
            }

            println!("{:<8} {:<24} {:<10} {:<6} {:<30}", "VERSION", "NAME", "STATUS", "STEPS", "UPDATED");
            println!("{}", "-".repeat(80));
            for p in versions {
                println!(
                    "{:<8} {:<24} {:<10} {:<6} {:<30}",
                    p.version,
                    truncate(&p.name, 24),
                    p.status,
                    p.steps.len(),
                    p.updated_at
                );
            }
            Ok(())
        }
        PipelineCommands::UpdateStatus { pipeline_id, status } => {
            let id = parse_id("pipeline", &pipeline_id)?;
            let changes = PipelineChanges {
                status: Some(status.into()),
                ..Default::default()
            };
            let pipeline = app
                .catalog
                .update(id, changes)?
                .with_context(|| format!("Pipeline not found: {}", pipeline_id))?;
            println!("Pipeline {} is now {} (version {})", pipeline.id, pipeline.status, pipeline.version);
            Ok(())
        }
        PipelineCommands::Delete { pipeline_id } => {
            let id = parse_id("pipeline", &pipeline_id)?;
            if !app.catalog.delete(id) {
                anyhow::bail!("Pipeline not found: {}", pipeline_id);
            }
            println!("Deleted pipeline {}", id);
            Ok(())
        }
        PipelineCommands::Run { pipeline_id, input, set } => {
            let id = parse_id("pipeline", &pipeline_id)?;
            let state = read_initial_state(input, &set)?;

            let orchestrator = app.orchestrator()?;
            let run = orchestrator.execute(id, state).await;

            print_run(&run);
            if run.status == RunStatus::Completed {
                println!("\nOutput:");
                print_json(&run.output_data)?;
                Ok(())
            } else {
                eprintln!("\n[Run {} {}]", run.id, run.status.as_str());
                std::process::exit(1);
            }
        }
    }
}

/// Build the initial state from an input file or stdin plus `--set` pairs
fn read_initial_state(input: Option<PathBuf>, pairs: &[String]) -> Result<StateMap> {
    let raw = if let Some(path) = input {
        Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?,
        )
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        Some(buffer)
    } else {
        None
    };

    let mut state = match raw.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => match serde_json::from_str::<Value>(text)
            .context("Input is not valid JSON")?
        {
            Value::Object(map) => map,
            _ => anyhow::bail!("Input must be a JSON object"),
        },
        _ => StateMap::new(),
    };

    for pair in pairs {
        let (key, value) = parse_pair(pair)?;
        state.insert(key, value);
    }

    Ok(state)
}

fn parse_pair(pair: &str) -> Result<(String, Value)> {
    let (key, raw) = pair
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{}'", pair))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
