//! Orchestrator Integration Tests
//!
//! Pattern semantics, timeouts, retries and the shared step limiter, driven
//! by a scripted in-process agent invoker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agentplane::adapters::{AgentInvoker, AgentRequest, AgentResponse};
use agentplane::core::{ExecutionLimits, Orchestrator, PipelineCatalog, RunHistory, DELEGATION_STEP_ID};
use agentplane::domain::{PipelineDraft, PipelinePattern, PipelineStep, RunStatus, StateMap};
use agentplane::storage::Store;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use uuid::Uuid;

/// Behaviour is chosen by agent id:
/// - `fail`: reports failure
/// - `raise`: returns an invoker error
/// - `panic`: panics inside the task
/// - `slow`: sleeps five seconds
/// - `sleepy`: sleeps 50ms
/// - `flaky-N`: fails the first N attempts
/// - `billed`: reports 100 tokens costing $0.01
/// - anything else echoes `{agent, input}`
#[derive(Default)]
struct ScriptedInvoker {
    attempts: Mutex<HashMap<String, u32>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    /// (agent, attempt) in call order
    log: Mutex<Vec<(String, u32)>>,
}

impl ScriptedInvoker {
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn position(&self, agent: &str, attempt: u32) -> Option<usize> {
        self.log
            .lock()
            .iter()
            .position(|(a, n)| a == agent && *n == attempt)
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, request: AgentRequest) -> anyhow::Result<AgentResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push((request.agent_id.clone(), request.attempt));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let response = respond(self, &request).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

async fn respond(invoker: &ScriptedInvoker, request: &AgentRequest) -> anyhow::Result<AgentResponse> {
    let agent = request.agent_id.as_str();
    let echo = json!({"agent": agent, "input": request.input});

    match agent {
        "fail" => Ok(AgentResponse::failed("scripted failure")),
        "raise" => anyhow::bail!("connection refused"),
        "panic" => panic!("agent blew up"),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(AgentResponse::completed(echo))
        }
        "sleepy" => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(AgentResponse::completed(echo))
        }
        "billed" => Ok(AgentResponse::completed(echo).with_usage(100, 0.01)),
        _ => {
            if let Some(n) = agent.strip_prefix("flaky-").and_then(|n| n.parse::<u32>().ok()) {
                let seen = {
                    let mut attempts = invoker.attempts.lock();
                    let count = attempts.entry(request.step_id.clone()).or_insert(0);
                    *count += 1;
                    *count
                };
                if seen <= n {
                    return Ok(AgentResponse::failed(format!("flaky attempt {}", seen)));
                }
            }
            Ok(AgentResponse::completed(echo))
        }
    }
}

struct Harness {
    engine: Orchestrator,
    invoker: Arc<ScriptedInvoker>,
}

fn harness() -> Harness {
    harness_with(ExecutionLimits {
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..Default::default()
    })
}

fn harness_with(limits: ExecutionLimits) -> Harness {
    let store = Arc::new(Store::in_memory());
    let invoker = Arc::new(ScriptedInvoker::default());
    let engine = Orchestrator::new(
        Arc::new(PipelineCatalog::new(Arc::clone(&store))),
        RunHistory::new(store),
        invoker.clone(),
    )
    .with_limits(limits);

    Harness { engine, invoker }
}

fn step(id: &str, agent: &str, order: i32) -> PipelineStep {
    PipelineStep::new(agent, order)
        .with_id(id)
        .with_output_key(format!("{}_out", id))
}

fn create(engine: &Orchestrator, pattern: PipelinePattern, steps: Vec<PipelineStep>) -> Uuid {
    let draft = steps
        .into_iter()
        .fold(PipelineDraft::new("test", pattern), |draft, s| draft.with_step(s));
    engine.catalog().create(draft).unwrap().id
}

fn input(value: serde_json::Value) -> StateMap {
    match value {
        serde_json::Value::Object(map) => map,
        _ => unreachable!("test input must be an object"),
    }
}

#[tokio::test]
async fn test_sequential_end_to_end() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Sequential,
        vec![step("research", "researcher", 1), step("write", "writer", 2)],
    );

    let run = h.engine.execute(id, input(json!({"input": "x"}))).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.steps_completed, 2);
    assert_eq!(run.steps_total, 2);
    assert!(run.output_data.contains_key("research_out"));
    assert!(run.output_data.contains_key("write_out"));
    assert_eq!(run.output_data["input"], json!("x"));
    assert!(run.completed_at.is_some());
    assert!(run.error.is_none());
}

#[tokio::test]
async fn test_sequential_threads_state_between_steps() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Sequential,
        vec![
            step("draft", "drafter", 1).with_input_key("topic"),
            step("edit", "editor", 2).with_input_key("draft_out"),
        ],
    );

    let run = h.engine.execute(id, input(json!({"topic": "rust"}))).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.output_data["draft_out"], json!({"agent": "drafter", "input": "rust"}));
    // The editor saw the drafter's output as its input
    assert_eq!(run.output_data["edit_out"]["input"], run.output_data["draft_out"]);
}

#[tokio::test]
async fn test_sequential_halts_on_first_failure() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Sequential,
        vec![step("a", "alpha", 1), step("b", "fail", 2), step("c", "gamma", 3)],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.steps_completed, 1);
    assert_eq!(run.step_results.len(), 2);
    assert_eq!(run.error.as_deref(), Some("scripted failure"));
    assert!(run.output_data.contains_key("a_out"));
    assert!(!run.output_data.contains_key("c_out"));
    assert!(run.step_result("c").is_none());
    // gamma never ran
    assert_eq!(h.invoker.calls(), 2);
}

#[tokio::test]
async fn test_sequential_invoker_error_becomes_step_failure() {
    let h = harness();
    let id = create(&h.engine, PipelinePattern::Sequential, vec![step("a", "raise", 1)]);

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("connection refused"));
    assert!(!run.step_results[0].is_success());
}

#[tokio::test]
async fn test_conditional_and_map_reduce_run_sequentially() {
    for pattern in [PipelinePattern::Conditional, PipelinePattern::MapReduce] {
        let h = harness();
        let id = create(
            &h.engine,
            pattern,
            vec![step("a", "alpha", 1), step("b", "fail", 2), step("c", "gamma", 3)],
        );

        let run = h.engine.execute(id, StateMap::new()).await;

        assert_eq!(run.status, RunStatus::Failed, "{}", pattern);
        assert_eq!(run.step_results.len(), 2, "{}", pattern);
    }
}

#[tokio::test]
async fn test_parallel_tolerates_partial_failure() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Parallel,
        vec![step("a", "alpha", 1), step("b", "fail", 2), step("c", "gamma", 3)],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.step_results.len(), run.steps_total);
    assert_eq!(run.steps_completed, 2);
    assert!(run.output_data.contains_key("a_out"));
    assert!(!run.output_data.contains_key("b_out"));
    assert!(run.output_data.contains_key("c_out"));
    // Results are recorded in step order
    let ids: Vec<&str> = run.step_results.iter().map(|r| r.step_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_parallel_steps_see_the_initial_state() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Parallel,
        vec![step("a", "alpha", 1).with_input_key("q"), step("b", "beta", 2).with_input_key("a_out")],
    );

    let run = h.engine.execute(id, input(json!({"q": 1}))).await;

    assert_eq!(run.output_data["a_out"]["input"], json!(1));
    // b started before a finished, so a's output was not in its input
    assert_eq!(run.output_data["b_out"]["input"], json!(null));
}

#[tokio::test]
async fn test_parallel_panic_is_captured() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Parallel,
        vec![step("a", "alpha", 1), step("boom", "panic", 2)],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.step_results.len(), 2);
    let boom = run.step_result("boom").unwrap();
    assert!(!boom.is_success());
    assert!(boom.error.as_deref().unwrap().contains("step task failed"));
    // The limiter permit was released despite the panic
    assert_eq!(h.engine.limiter().in_flight(), 0);
}

#[tokio::test]
async fn test_supervisor_records_delegation_first() {
    let h = harness();
    let draft = PipelineDraft::new("sup", PipelinePattern::Supervisor)
        .with_supervisor("lead")
        .with_step(step("a", "alpha", 1))
        .with_step(step("b", "fail", 2));
    let id = h.engine.catalog().create(draft).unwrap().id;

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.steps_total, 3);
    assert_eq!(run.step_results.len(), 3);
    assert_eq!(run.steps_completed, 2);

    let delegation = &run.step_results[0];
    assert_eq!(delegation.step_id, DELEGATION_STEP_ID);
    assert_eq!(delegation.agent_id, "lead");
    assert_eq!(delegation.output, Some(json!({"delegated_to": ["alpha", "fail"]})));
}

#[tokio::test]
async fn test_disabled_steps_are_skipped() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Sequential,
        vec![step("a", "alpha", 1), step("b", "fail", 2).disabled()],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.steps_total, 1);
    assert_eq!(run.step_results.len(), 1);
}

#[tokio::test]
async fn test_empty_pipeline_completes() {
    let h = harness();
    let id = create(&h.engine, PipelinePattern::Parallel, vec![]);

    let run = h.engine.execute(id, input(json!({"k": "v"}))).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.steps_total, 0);
    assert_eq!(run.output_data["k"], json!("v"));
}

#[tokio::test]
async fn test_step_timeout_fails_the_step() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Sequential,
        vec![step("wait", "slow", 1).with_timeout(1)],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("step wait timed out after 1s"));
    assert_eq!(run.step_results[0].attempts, 1);
}

#[tokio::test]
async fn test_retries_until_success() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Sequential,
        vec![step("a", "flaky-2", 1).with_retries(2)],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.step_results[0].attempts, 3);
}

#[tokio::test]
async fn test_retries_exhausted() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Sequential,
        vec![step("a", "flaky-5", 1).with_retries(1)],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.step_results[0].attempts, 2);
    assert_eq!(run.error.as_deref(), Some("flaky attempt 2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_limiter_bounds_concurrency() {
    let h = harness_with(ExecutionLimits {
        max_concurrent_steps: 2,
        ..Default::default()
    });
    let steps = (1..=6)
        .map(|i| step(&format!("s{}", i), "sleepy", i))
        .collect();
    let id = create(&h.engine, PipelinePattern::Parallel, steps);

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.steps_completed, 6);
    assert!(h.invoker.peak() <= 2, "peak concurrency was {}", h.invoker.peak());
    assert_eq!(h.engine.limiter().in_flight(), 0);
}

#[tokio::test]
async fn test_retry_backoff_releases_limiter_permit() {
    let h = harness_with(ExecutionLimits {
        max_concurrent_steps: 1,
        retry_initial_delay_ms: 400,
        retry_max_delay_ms: 400,
        ..Default::default()
    });
    let id = create(
        &h.engine,
        PipelinePattern::Parallel,
        vec![
            step("a", "flaky-1", 1).with_retries(1),
            step("b", "sleepy", 2),
        ],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.step_results.iter().all(|r| r.is_success()));
    // The sleepy step ran while the flaky one waited to retry
    let sleepy = h.invoker.position("sleepy", 1).unwrap();
    let retry = h.invoker.position("flaky-1", 2).unwrap();
    assert!(sleepy < retry);
    assert_eq!(h.engine.limiter().available(), 1);
}

#[tokio::test]
async fn test_usage_totals_accumulate() {
    let h = harness();
    let id = create(
        &h.engine,
        PipelinePattern::Parallel,
        vec![step("a", "billed", 1), step("b", "billed", 2)],
    );

    let run = h.engine.execute(id, StateMap::new()).await;

    assert_eq!(run.total_tokens, 200);
    assert!((run.total_cost_usd - 0.02).abs() < 1e-9);
}

#[tokio::test]
async fn test_runs_are_recorded_in_history() {
    let h = harness();
    let id = create(&h.engine, PipelinePattern::Sequential, vec![step("a", "alpha", 1)]);

    let first = h.engine.execute(id, StateMap::new()).await;
    let second = h.engine.execute(id, StateMap::new()).await;

    let stored = h.engine.history().get(first.id).unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert_eq!(stored.step_results.len(), 1);

    let runs = h.engine.history().list_for_pipeline(id, 10);
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, second.id);
}
