//! In-memory store
//!
//! A `Store` implementation backed by a single mutex. Every operation takes
//! the lock exactly once, which gives conditional and composite writes their
//! required atomicity for free. Used by the test suite and for local
//! development with `STORE=memory`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use showrun_core::domain::attribution::Attribution;
use showrun_core::domain::pipeline::{Pipeline, PipelineStatus};
use showrun_core::domain::stage::{Stage, StageStatus};
use showrun_core::dto::pipeline::PipelineDetail;
use showrun_core::registry::StageName;

use super::{PipelineAdvance, StageUpdate, Store, StoreError, apply_stage_update};

#[derive(Debug, Default)]
struct State {
    pipelines: HashMap<Uuid, Pipeline>,
    stages: HashMap<Uuid, Stage>,
    attributions: Vec<Attribution>,
}

/// In-memory `Store` implementation
#[derive(Debug, Default)]
pub struct MemStore {
    state: Mutex<State>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ordered_stages(state: &State, pipeline_id: Uuid) -> Vec<Stage> {
        let mut stages: Vec<Stage> = state
            .stages
            .values()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        stages.sort_by_key(|s| s.name.order_index());
        stages
    }

    fn apply_advance(state: &mut State, pipeline_id: Uuid, advance: &PipelineAdvance) {
        if let Some(pipeline) = state.pipelines.get_mut(&pipeline_id) {
            if pipeline.status != PipelineStatus::Running {
                return;
            }
            if let Some(status) = advance.status {
                pipeline.status = status;
            }
            if let Some(current_stage) = advance.current_stage {
                pipeline.current_stage = current_stage;
            }
            pipeline.updated_at = Utc::now();
        }
    }

    fn cas_stage(
        state: &mut State,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: &StageUpdate,
    ) -> Option<Stage> {
        let stage = state.stages.get_mut(&stage_id)?;
        if !expected.contains(&stage.status) {
            return None;
        }
        apply_stage_update(stage, update);
        Some(stage.clone())
    }

    fn insert_attribution(state: &mut State, attribution: &Attribution) -> bool {
        let exists = state.attributions.iter().any(|a| {
            a.pipeline_id == attribution.pipeline_id && a.stage_name == attribution.stage_name
        });
        if exists {
            return false;
        }
        state.attributions.push(attribution.clone());
        true
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_pipeline_with_stages(
        &self,
        pipeline: &Pipeline,
        stages: &[Stage],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.pipelines.insert(pipeline.id, pipeline.clone());
        for stage in stages {
            state.stages.insert(stage.id, stage.clone());
        }
        Ok(())
    }

    async fn find_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.pipelines.get(&id).cloned())
    }

    async fn find_pipeline_stages(&self, pipeline_id: Uuid) -> Result<Vec<Stage>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(Self::ordered_stages(&state, pipeline_id))
    }

    async fn find_stage(
        &self,
        pipeline_id: Uuid,
        name: StageName,
    ) -> Result<Option<Stage>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .stages
            .values()
            .find(|s| s.pipeline_id == pipeline_id && s.name == name)
            .cloned())
    }

    async fn find_stage_by_id(&self, stage_id: Uuid) -> Result<Option<Stage>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.stages.get(&stage_id).cloned())
    }

    async fn list_pipelines(
        &self,
        status: Option<PipelineStatus>,
        limit: u32,
    ) -> Result<Vec<Pipeline>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut pipelines: Vec<Pipeline> = state
            .pipelines
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        pipelines.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pipelines.truncate(limit as usize);
        Ok(pipelines)
    }

    async fn list_running_pipelines_with_stages(
        &self,
    ) -> Result<Vec<PipelineDetail>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut running: Vec<Pipeline> = state
            .pipelines
            .values()
            .filter(|p| p.status == PipelineStatus::Running)
            .cloned()
            .collect();
        running.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(running
            .into_iter()
            .map(|pipeline| {
                let stages = Self::ordered_stages(&state, pipeline.id);
                PipelineDetail { pipeline, stages }
            })
            .collect())
    }

    async fn compare_and_update_stage(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
    ) -> Result<Option<Stage>, StoreError> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::cas_stage(&mut state, stage_id, expected, &update))
    }

    async fn update_pipeline(
        &self,
        id: Uuid,
        status: Option<PipelineStatus>,
        current_stage: Option<StageName>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if let Some(pipeline) = state.pipelines.get_mut(&id) {
            if let Some(status) = status {
                pipeline.status = status;
            }
            if let Some(current_stage) = current_stage {
                pipeline.current_stage = current_stage;
            }
            pipeline.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn append_attribution(&self, attribution: &Attribution) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::insert_attribution(&mut state, attribution))
    }

    async fn list_attributions(&self, pipeline_id: Uuid) -> Result<Vec<Attribution>, StoreError> {
        let state = self.state.lock().unwrap();
        let mut attributions: Vec<Attribution> = state
            .attributions
            .iter()
            .filter(|a| a.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        attributions.sort_by_key(|a| a.stage_name.order_index());
        Ok(attributions)
    }

    async fn complete_stage_atomic(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
        attribution: &Attribution,
        advance: PipelineAdvance,
    ) -> Result<Option<Stage>, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(stage) = Self::cas_stage(&mut state, stage_id, expected, &update) else {
            return Ok(None);
        };
        Self::insert_attribution(&mut state, attribution);
        Self::apply_advance(&mut state, stage.pipeline_id, &advance);
        Ok(Some(stage))
    }

    async fn fail_stage_atomic(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
        advance: PipelineAdvance,
    ) -> Result<Option<Stage>, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(stage) = Self::cas_stage(&mut state, stage_id, expected, &update) else {
            return Ok(None);
        };
        Self::apply_advance(&mut state, stage.pipeline_id, &advance);
        Ok(Some(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(store: &MemStore) -> (Pipeline, Vec<Stage>) {
        let pipeline = Pipeline::draft("test topic".to_string(), None);
        let stages: Vec<Stage> = StageName::all()
            .iter()
            .map(|name| Stage::pending(pipeline.id, *name))
            .collect();
        store
            .create_pipeline_with_stages(&pipeline, &stages)
            .await
            .unwrap();
        (pipeline, stages)
    }

    #[tokio::test]
    async fn test_cas_honors_expected_status() {
        let store = MemStore::new();
        let (_, stages) = seed(&store).await;
        let stage_id = stages[0].id;

        let claimed = store
            .compare_and_update_stage(
                stage_id,
                &[StageStatus::Pending],
                StageUpdate::claim("a1".to_string(), "Agent One".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(claimed.unwrap().status, StageStatus::Claimed);

        // Second claim sees CLAIMED, not PENDING, and must not match.
        let lost = store
            .compare_and_update_stage(
                stage_id,
                &[StageStatus::Pending],
                StageUpdate::claim("a2".to_string(), "Agent Two".to_string()),
            )
            .await
            .unwrap();
        assert!(lost.is_none());

        let stored = store.find_stage_by_id(stage_id).await.unwrap().unwrap();
        assert_eq!(stored.agent_id.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_attribution_unique_per_pipeline_and_stage() {
        let store = MemStore::new();
        let (pipeline, stages) = seed(&store).await;
        let attribution = Attribution::new(
            pipeline.id,
            stages[0].id,
            StageName::Research,
            "a1".to_string(),
            "Agent One".to_string(),
        );

        assert!(store.append_attribution(&attribution).await.unwrap());
        assert!(!store.append_attribution(&attribution).await.unwrap());

        let stored = store.list_attributions(pipeline.id).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_advance_guard_skips_failed_pipeline() {
        let store = MemStore::new();
        let (pipeline, stages) = seed(&store).await;
        store
            .update_pipeline(pipeline.id, Some(PipelineStatus::Running), None)
            .await
            .unwrap();
        store
            .compare_and_update_stage(
                stages[0].id,
                &[StageStatus::Pending],
                StageUpdate::claim("a1".to_string(), "Agent One".to_string()),
            )
            .await
            .unwrap();

        // Pipeline fails out-of-band before the completion lands.
        store
            .update_pipeline(pipeline.id, Some(PipelineStatus::Failed), None)
            .await
            .unwrap();

        let attribution = Attribution::new(
            pipeline.id,
            stages[0].id,
            StageName::Research,
            "a1".to_string(),
            "Agent One".to_string(),
        );
        let completed = store
            .complete_stage_atomic(
                stages[0].id,
                &[StageStatus::Claimed, StageStatus::Running],
                StageUpdate::complete(serde_json::json!({}), vec![]),
                &attribution,
                PipelineAdvance::to_stage(StageName::Script),
            )
            .await
            .unwrap();

        // The stage transition succeeds; the pipeline stays FAILED.
        assert_eq!(completed.unwrap().status, StageStatus::Complete);
        let stored = store.find_pipeline(pipeline.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PipelineStatus::Failed);
        assert_eq!(stored.current_stage, StageName::Research);
    }
}
