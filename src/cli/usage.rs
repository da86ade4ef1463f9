//! Usage metering CLI subcommands.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_json::Value;

use super::{print_json, App};
use crate::core::ProviderResponseContext;
use crate::domain::{Dimension, MeteringAggregation, UsageEvent, UsageFilter, UsageStatus};

#[derive(Subcommand, Debug)]
pub enum UsageCommands {
    /// Totals over the window
    Summary {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Break usage down by one attribute
    By {
        #[arg(value_enum)]
        dimension: DimensionArg,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Daily requests, tokens and cost
    Trend {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Export a billing report as JSON
    Export {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Record usage from a JSON-lines file
    Ingest {
        /// One usage event (or provider response envelope) per line
        file: PathBuf,

        /// Lines are `{model_id, ..., response}` envelopes around raw provider responses
        #[arg(long)]
        responses: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Trailing window in days
    #[arg(short, long, default_value = "30")]
    pub days: u32,

    #[arg(long)]
    pub group: Option<String>,

    #[arg(long)]
    pub lob: Option<String>,

    #[arg(long)]
    pub agent: Option<String>,
}

impl From<FilterArgs> for UsageFilter {
    fn from(args: FilterArgs) -> Self {
        Self {
            group_id: args.group,
            lob_id: args.lob,
            agent_id: args.agent,
            period_days: args.days,
        }
    }
}

/// Dimension for CLI (maps to Dimension)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DimensionArg {
    Group,
    Lob,
    Agent,
    Model,
    User,
}

impl From<DimensionArg> for Dimension {
    fn from(d: DimensionArg) -> Self {
        match d {
            DimensionArg::Group => Dimension::Group,
            DimensionArg::Lob => Dimension::Lob,
            DimensionArg::Agent => Dimension::Agent,
            DimensionArg::Model => Dimension::Model,
            DimensionArg::User => Dimension::User,
        }
    }
}

/// A raw provider response with its attribution
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    model_id: String,
    provider: Option<String>,
    group_id: Option<String>,
    lob_id: Option<String>,
    user_id: Option<String>,
    agent_id: Option<String>,
    #[serde(default)]
    latency_ms: u64,
    #[serde(default)]
    status: UsageStatus,
    response: Value,
}

impl ResponseEnvelope {
    fn into_parts(self) -> (ProviderResponseContext, Value) {
        let context = ProviderResponseContext {
            model_id: self.model_id,
            provider: self.provider,
            group_id: self.group_id,
            lob_id: self.lob_id,
            user_id: self.user_id,
            agent_id: self.agent_id,
            latency_ms: self.latency_ms,
            status: self.status,
        };
        (context, self.response)
    }
}

pub fn execute(app: &App, command: UsageCommands) -> Result<()> {
    let meter = &app.meter;

    match command {
        UsageCommands::Summary { filter } => {
            let summary = meter.summary(&filter.into());

            println!("Usage over the last {} days", summary.period_days);
            println!();
            println!("Requests:      {}", summary.total_requests);
            println!(
                "Tokens:        {} ({} in / {} out)",
                summary.total_tokens, summary.input_tokens, summary.output_tokens
            );
            println!("Cost:          ${:.4}", summary.total_cost_usd);
            println!("Avg latency:   {:.1}ms", summary.avg_latency_ms);
            println!("Success rate:  {:.1}%", summary.success_rate * 100.0);
            println!(
                "Distinct:      {} agents, {} models, {} users",
                summary.unique_agents, summary.unique_models, summary.unique_users
            );
            Ok(())
        }
        UsageCommands::By { dimension, filter } => {
            let rows = meter.aggregate(dimension.into(), &filter.into());
            print_aggregations(&rows);
            Ok(())
        }
        UsageCommands::Trend { filter } => {
            let days = meter.daily_trend(&filter.into());
            if days.is_empty() {
                println!("No usage recorded");
                return Ok(());
            }

            println!("{:<12} {:>10} {:>12} {:>12}", "DATE", "REQUESTS", "TOKENS", "COST");
            println!("{}", "-".repeat(49));
            for day in days {
                println!(
                    "{:<12} {:>10} {:>12} {:>12}",
                    day.date.to_string(),
                    day.requests,
                    day.tokens,
                    format!("${:.4}", day.cost_usd)
                );
            }
            Ok(())
        }
        UsageCommands::Export { output, filter } => {
            let report = meter.export_billing(&filter.into());
            match output {
                Some(path) => {
                    let json = serde_json::to_string_pretty(&report)?;
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write report: {}", path.display()))?;
                    println!("Wrote billing report to {}", path.display());
                    Ok(())
                }
                None => print_json(&report),
            }
        }
        UsageCommands::Ingest { file, responses } => {
            let handle = std::fs::File::open(&file)
                .with_context(|| format!("Failed to open {}", file.display()))?;

            let mut recorded = 0usize;
            for (index, line) in BufReader::new(handle).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let line_no = index + 1;

                if responses {
                    let envelope: ResponseEnvelope = serde_json::from_str(&line)
                        .with_context(|| format!("Line {}: invalid response envelope", line_no))?;
                    let (context, response) = envelope.into_parts();
                    meter.record_from_response(context, &response);
                } else {
                    let event: UsageEvent = serde_json::from_str(&line)
                        .with_context(|| format!("Line {}: invalid usage event", line_no))?;
                    meter.record(event);
                }
                recorded += 1;
            }

            println!("Recorded {} usage records", recorded);
            Ok(())
        }
    }
}

fn print_aggregations(rows: &[MeteringAggregation]) {
    if rows.is_empty() {
        println!("No usage recorded");
        return;
    }

    println!(
        "{:<24} {:>9} {:>12} {:>12} {:>10} {:>8}",
        rows[0].dimension.as_str().to_uppercase(),
        "REQUESTS",
        "TOKENS",
        "COST",
        "LATENCY",
        "SUCCESS"
    );
    println!("{}", "-".repeat(80));
    for row in rows {
        println!(
            "{:<24} {:>9} {:>12} {:>12} {:>10} {:>8}",
            row.value,
            row.total_requests,
            row.total_tokens,
            format!("${:.4}", row.total_cost_usd),
            format!("{:.0}ms", row.avg_latency_ms),
            format!("{:.0}%", row.success_rate * 100.0)
        );
    }
}
