//! Pipeline CRUD and version history.
//!
//! Every create and update appends a deep copy of the pipeline to its
//! version history; the history is only removed together with the pipeline.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{Pipeline, PipelineChanges, PipelineDraft, PipelineError};
use crate::storage::{Collection, Store};

/// Store of pipeline definitions
pub struct PipelineCatalog {
    store: Arc<Store>,
    /// Serializes read-modify-write cycles on pipelines and their history
    write_lock: Mutex<()>,
}

impl PipelineCatalog {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Validate and store version 1 of a new pipeline
    pub fn create(&self, draft: PipelineDraft) -> Result<Pipeline, PipelineError> {
        draft.validate()?;

        let pipeline = Pipeline::from_draft(draft);
        let key = pipeline.id.to_string();

        let _guard = self.write_lock.lock();
        self.store.put(Collection::Pipelines, &key, &pipeline);
        self.store
            .put(Collection::PipelineVersions, &key, &vec![pipeline.clone()]);

        info!(pipeline_id = %pipeline.id, name = %pipeline.name, "Pipeline created");
        Ok(pipeline)
    }

    /// Apply `changes`, bump the version and append to history.
    ///
    /// Returns `Ok(None)` when the pipeline does not exist.
    pub fn update(&self, id: Uuid, changes: PipelineChanges) -> Result<Option<Pipeline>, PipelineError> {
        let key = id.to_string();
        let _guard = self.write_lock.lock();

        let Some(mut pipeline) = self.store.get::<Pipeline>(Collection::Pipelines, &key) else {
            return Ok(None);
        };

        changes.apply_to(&mut pipeline);
        pipeline.validate()?;
        pipeline.version += 1;
        pipeline.updated_at = Utc::now();

        let mut versions: Vec<Pipeline> = self
            .store
            .get(Collection::PipelineVersions, &key)
            .unwrap_or_default();
        versions.push(pipeline.clone());

        self.store.put(Collection::Pipelines, &key, &pipeline);
        self.store.put(Collection::PipelineVersions, &key, &versions);

        info!(pipeline_id = %id, version = pipeline.version, "Pipeline updated");
        Ok(Some(pipeline))
    }

    /// Remove a pipeline and its whole history
    pub fn delete(&self, id: Uuid) -> bool {
        let key = id.to_string();
        let _guard = self.write_lock.lock();

        let existed = self.store.delete(Collection::Pipelines, &key);
        self.store.delete(Collection::PipelineVersions, &key);

        if existed {
            info!(pipeline_id = %id, "Pipeline deleted");
        }
        existed
    }

    pub fn get(&self, id: Uuid) -> Option<Pipeline> {
        self.store.get(Collection::Pipelines, &id.to_string())
    }

    /// All pipelines, most recently updated first
    pub fn list(&self) -> Vec<Pipeline> {
        let mut pipelines: Vec<Pipeline> = self.store.list(Collection::Pipelines);
        pipelines.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        pipelines
    }

    /// Case-insensitive substring search over name and description
    pub fn search(&self, query: &str) -> Vec<Pipeline> {
        let query_lower = query.to_lowercase();
        debug!(query, "Searching pipelines");

        self.list()
            .into_iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&query_lower)
                    || p.description.to_lowercase().contains(&query_lower)
            })
            .collect()
    }

    /// Every stored version, oldest first
    pub fn versions(&self, id: Uuid) -> Vec<Pipeline> {
        self.store
            .get(Collection::PipelineVersions, &id.to_string())
            .unwrap_or_default()
    }

    /// A specific historical version
    pub fn version(&self, id: Uuid, version: u32) -> Option<Pipeline> {
        self.versions(id).into_iter().find(|p| p.version == version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PipelinePattern, PipelineStatus, PipelineStep};

    fn catalog() -> PipelineCatalog {
        PipelineCatalog::new(Arc::new(Store::in_memory()))
    }

    fn draft(name: &str) -> PipelineDraft {
        PipelineDraft::new(name, PipelinePattern::Sequential)
            .with_step(PipelineStep::new("agent-a", 1))
    }

    #[test]
    fn test_create_seeds_history() {
        let catalog = catalog();
        let pipeline = catalog.create(draft("alpha")).unwrap();

        assert_eq!(pipeline.version, 1);
        let versions = catalog.versions(pipeline.id);
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0], pipeline);
    }

    #[test]
    fn test_update_bumps_version_and_appends_copy() {
        let catalog = catalog();
        let pipeline = catalog.create(draft("alpha")).unwrap();

        let updated = catalog
            .update(
                pipeline.id,
                PipelineChanges {
                    description: Some("v2".to_string()),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        let again = catalog
            .update(
                pipeline.id,
                PipelineChanges {
                    status: Some(PipelineStatus::Active),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(again.version, 3);
        assert_eq!(again.created_at, pipeline.created_at);

        let versions = catalog.versions(pipeline.id);
        assert_eq!(
            versions.iter().map(|p| p.version).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // Earlier copies are not affected by later edits
        assert_eq!(versions[0].description, "");
        assert_eq!(versions[1].status, PipelineStatus::Draft);
        assert_eq!(catalog.version(pipeline.id, 2).unwrap().description, "v2");
    }

    #[test]
    fn test_update_missing_pipeline() {
        let catalog = catalog();
        assert_eq!(catalog.update(Uuid::new_v4(), PipelineChanges::default()), Ok(None));
    }

    #[test]
    fn test_invalid_update_leaves_pipeline_untouched() {
        let catalog = catalog();
        let pipeline = catalog.create(draft("alpha")).unwrap();

        let result = catalog.update(
            pipeline.id,
            PipelineChanges {
                name: Some("  ".to_string()),
                ..Default::default()
            },
        );

        assert_eq!(result, Err(PipelineError::EmptyName));
        assert_eq!(catalog.get(pipeline.id).unwrap().version, 1);
        assert_eq!(catalog.versions(pipeline.id).len(), 1);
    }

    #[test]
    fn test_delete_removes_history() {
        let catalog = catalog();
        let pipeline = catalog.create(draft("alpha")).unwrap();

        assert!(catalog.delete(pipeline.id));
        assert!(catalog.get(pipeline.id).is_none());
        assert!(catalog.versions(pipeline.id).is_empty());
        assert!(!catalog.delete(pipeline.id));
    }

    #[test]
    fn test_search_and_list_order() {
        let catalog = catalog();
        let first = catalog.create(draft("Support triage")).unwrap();
        let second = catalog
            .create(draft("billing").with_description("Handles SUPPORT refunds"))
            .unwrap();
        catalog.create(draft("unrelated")).unwrap();

        let hits = catalog.search("support");
        assert_eq!(hits.len(), 2);

        // Touch the first so it becomes the most recently updated
        catalog
            .update(first.id, PipelineChanges::default())
            .unwrap()
            .unwrap();
        let listed = catalog.list();
        assert_eq!(listed[0].id, first.id);
        assert!(listed.iter().any(|p| p.id == second.id));
    }
}
