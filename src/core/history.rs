//! Durable history of pipeline runs.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::PipelineRun;
use crate::storage::{Collection, Store};

/// Run history, queryable by pipeline
#[derive(Clone)]
pub struct RunHistory {
    store: Arc<Store>,
}

impl RunHistory {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Persist a run (overwrites an earlier copy of the same run)
    pub fn record(&self, run: &PipelineRun) {
        self.store.put(Collection::Runs, &run.id.to_string(), run);
    }

    pub fn get(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.store.get(Collection::Runs, &run_id.to_string())
    }

    /// Most recent runs of one pipeline first
    pub fn list_for_pipeline(&self, pipeline_id: Uuid, limit: usize) -> Vec<PipelineRun> {
        let mut runs: Vec<PipelineRun> = self
            .store
            .list::<PipelineRun>(Collection::Runs)
            .into_iter()
            .filter(|run| run.pipeline_id == pipeline_id)
            .collect();
        sort_recent_first(&mut runs);
        runs.truncate(limit);
        runs
    }

    /// Most recent runs across all pipelines first
    pub fn list_recent(&self, limit: usize) -> Vec<PipelineRun> {
        let mut runs: Vec<PipelineRun> = self.store.list(Collection::Runs);
        sort_recent_first(&mut runs);
        runs.truncate(limit);
        runs
    }
}

fn sort_recent_first(runs: &mut [PipelineRun]) {
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
}
