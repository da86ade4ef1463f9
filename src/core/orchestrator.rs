//! Main orchestrator for pipeline execution.
//!
//! Resolves the pipeline, schedules its enabled steps according to the
//! pipeline's pattern, applies per-step timeouts and retries, threads the
//! accumulated state between steps and persists the finished run.
//!
//! `execute` never returns an error: every failure mode (unknown pipeline,
//! agent error, timeout, panic) ends up in the returned [`PipelineRun`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::history::RunHistory;
use super::limits::{ExecutionLimits, StepLimiter};
use super::pipelines::PipelineCatalog;
use crate::adapters::{AgentInvoker, AgentRequest};
use crate::domain::{
    Pipeline, PipelinePattern, PipelineRun, PipelineStep, RunStatus, StateMap, StepResult,
};

/// Step id of the synthetic result recorded by supervisor runs
pub const DELEGATION_STEP_ID: &str = "delegation";

/// Agent recorded for delegation when the pipeline names no supervisor
const DEFAULT_SUPERVISOR: &str = "supervisor";

/// Main pipeline orchestrator
pub struct Orchestrator {
    catalog: Arc<PipelineCatalog>,
    history: RunHistory,
    invoker: Arc<dyn AgentInvoker>,
    limits: ExecutionLimits,
    /// Shared by every parallel and supervisor execution of this engine
    limiter: StepLimiter,
}

/// Everything a spawned step task needs, detached from `&self`
#[derive(Clone)]
struct StepContext {
    run_id: Uuid,
    pipeline_id: Uuid,
    invoker: Arc<dyn AgentInvoker>,
    limits: ExecutionLimits,
}

impl Orchestrator {
    /// Create an orchestrator with default execution limits
    pub fn new(catalog: Arc<PipelineCatalog>, history: RunHistory, invoker: Arc<dyn AgentInvoker>) -> Self {
        let limits = ExecutionLimits::default();
        Self {
            catalog,
            history,
            invoker,
            limiter: StepLimiter::from_limits(&limits),
            limits,
        }
    }

    /// Replace the execution limits (and the limiter sized from them)
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limiter = StepLimiter::from_limits(&limits);
        self.limits = limits;
        self
    }

    /// Use an existing limiter, e.g. one shared with another engine
    pub fn with_limiter(mut self, limiter: StepLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn limiter(&self) -> &StepLimiter {
        &self.limiter
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    pub fn catalog(&self) -> &Arc<PipelineCatalog> {
        &self.catalog
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    /// Execute a pipeline with the given input state
    #[instrument(skip(self, input_data), fields(pipeline_id = %pipeline_id))]
    pub async fn execute(&self, pipeline_id: Uuid, input_data: StateMap) -> PipelineRun {
        let Some(pipeline) = self.catalog.get(pipeline_id) else {
            warn!("Pipeline not found");
            let run = PipelineRun::not_found(pipeline_id, input_data);
            self.history.record(&run);
            return run;
        };

        let steps: Vec<PipelineStep> = pipeline.enabled_steps().into_iter().cloned().collect();
        let steps_total = match pipeline.pattern {
            PipelinePattern::Supervisor => steps.len() + 1,
            _ => steps.len(),
        };

        let mut run = PipelineRun::new(&pipeline, input_data.clone(), steps_total);
        info!(
            run_id = %run.id,
            pipeline = %pipeline.name,
            pattern = %pipeline.pattern,
            steps = steps_total,
            "Starting pipeline execution"
        );

        let ctx = StepContext {
            run_id: run.id,
            pipeline_id: pipeline.id,
            invoker: Arc::clone(&self.invoker),
            limits: self.limits.clone(),
        };
        let mut state = input_data;

        let (status, run_error) = match pipeline.pattern {
            PipelinePattern::Sequential | PipelinePattern::Conditional | PipelinePattern::MapReduce => {
                self.run_sequential(&ctx, &steps, &mut run, &mut state).await
            }
            PipelinePattern::Parallel => {
                self.run_parallel(&ctx, &steps, &mut run, &mut state).await;
                (RunStatus::Completed, None)
            }
            PipelinePattern::Supervisor => {
                run.record_step(delegation_result(&pipeline, &steps));
                self.run_parallel(&ctx, &steps, &mut run, &mut state).await;
                (RunStatus::Completed, None)
            }
        };

        run.output_data = state;
        run.finish(status, run_error);
        self.history.record(&run);

        info!(
            run_id = %run.id,
            status = run.status.as_str(),
            completed = run.steps_completed,
            total = run.steps_total,
            latency_ms = run.total_latency_ms,
            cost_usd = run.total_cost_usd,
            "Pipeline execution finished"
        );
        run
    }

    /// One step at a time, halting on the first failure
    async fn run_sequential(
        &self,
        ctx: &StepContext,
        steps: &[PipelineStep],
        run: &mut PipelineRun,
        state: &mut StateMap,
    ) -> (RunStatus, Option<String>) {
        for step in steps {
            debug!(step = %step.id, agent = %step.agent_id, "Running step");

            let result = execute_step(ctx.clone(), step.clone(), step_input(step, state), None).await;

            if !result.is_success() {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("step {} failed", step.id));
                run.record_step(result);
                return (RunStatus::Failed, Some(message));
            }

            merge_output(step, &result, state);
            run.record_step(result);
        }

        (RunStatus::Completed, None)
    }

    /// All steps concurrently under the shared limiter, tolerating partial failure
    async fn run_parallel(
        &self,
        ctx: &StepContext,
        steps: &[PipelineStep],
        run: &mut PipelineRun,
        state: &mut StateMap,
    ) {
        let handles: Vec<(PipelineStep, JoinHandle<StepResult>)> = steps
            .iter()
            .map(|step| {
                let input = step_input(step, state);
                let ctx = ctx.clone();
                let limiter = self.limiter.clone();
                let task_step = step.clone();

                debug!(step = %step.id, agent = %step.agent_id, "Spawning step");
                let handle = tokio::spawn(execute_step(ctx, task_step, input, Some(limiter)));
                (step.clone(), handle)
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for (step, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    error!(step = %step.id, error = %e, "Step task panicked");
                    StepResult::failed(&step.id, &step.agent_id, format!("step task failed: {}", e))
                }
            };
            results.push((step, result));
        }

        // Merge in step order; later steps win shared output keys
        let mut written: HashSet<String> = HashSet::new();
        for (step, result) in results {
            if let (Some(key), true) = (&step.output_key, result.is_success()) {
                if !written.insert(key.clone()) {
                    warn!(step = %step.id, key = %key, "Output key written by more than one step");
                }
            }
            merge_output(&step, &result, state);
            run.record_step(result);
        }
    }
}

/// The value handed to a step's agent
fn step_input(step: &PipelineStep, state: &StateMap) -> Value {
    match &step.input_key {
        Some(key) => state.get(key).cloned().unwrap_or(Value::Null),
        None => Value::Object(state.clone()),
    }
}

fn merge_output(step: &PipelineStep, result: &StepResult, state: &mut StateMap) {
    if !result.is_success() {
        return;
    }
    if let (Some(key), Some(output)) = (&step.output_key, &result.output) {
        state.insert(key.clone(), output.clone());
    }
}

fn delegation_result(pipeline: &Pipeline, steps: &[PipelineStep]) -> StepResult {
    let supervisor = pipeline
        .supervisor_agent_id
        .as_deref()
        .unwrap_or(DEFAULT_SUPERVISOR);
    let delegated: Vec<&str> = steps.iter().map(|s| s.agent_id.as_str()).collect();

    StepResult::completed(DELEGATION_STEP_ID, supervisor, json!({ "delegated_to": delegated }))
}

/// Run one step with timeout and retry; failures become failed results.
///
/// With a limiter, each attempt holds a permit only while it runs, never
/// across the backoff between attempts.
async fn execute_step(
    ctx: StepContext,
    step: PipelineStep,
    input: Value,
    limiter: Option<StepLimiter>,
) -> StepResult {
    let policy = step.retry_policy(&ctx.limits);
    let step_timeout = step.timeout(&ctx.limits);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let permit = match &limiter {
            Some(limiter) => match limiter.acquire().await {
                Ok(permit) => Some(permit),
                Err(e) => {
                    return StepResult::failed(&step.id, &step.agent_id, format!("step limiter closed: {}", e))
                        .with_attempts(attempt);
                }
            },
            None => None,
        };
        let started = Instant::now();

        let request = AgentRequest {
            run_id: ctx.run_id,
            pipeline_id: ctx.pipeline_id,
            step_id: step.id.clone(),
            agent_id: step.agent_id.clone(),
            input: input.clone(),
            attempt,
            timeout_seconds: step_timeout.as_secs(),
        };

        let outcome = tokio::time::timeout(step_timeout, ctx.invoker.invoke(request)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        drop(permit);

        let failure = match outcome {
            Ok(Ok(response)) if response.is_completed() => {
                let latency_ms = if response.latency_ms > 0 {
                    response.latency_ms
                } else {
                    elapsed_ms
                };
                debug!(step = %step.id, attempt, latency_ms, "Step completed");

                return StepResult::completed(&step.id, &step.agent_id, response.output.unwrap_or(Value::Null))
                    .with_latency(latency_ms)
                    .with_usage(response.tokens_used, response.cost_usd)
                    .with_attempts(attempt);
            }
            Ok(Ok(response)) => response
                .error
                .unwrap_or_else(|| format!("agent {} reported failure", step.agent_id)),
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!("step {} timed out after {}s", step.id, step_timeout.as_secs()),
        };

        if policy.should_retry(attempt) {
            let delay = policy.delay_for_attempt(attempt);
            warn!(
                step = %step.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Step failed, retrying"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        warn!(step = %step.id, attempt, error = %failure, "Step failed permanently");
        return StepResult::failed(&step.id, &step.agent_id, failure)
            .with_latency(elapsed_ms)
            .with_attempts(attempt);
    }
}
