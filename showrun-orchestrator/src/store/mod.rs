//! Persistent store port
//!
//! The abstract interface the scheduler and attribution engine depend on.
//! Implementations must make `compare_and_update_stage` atomic with respect
//! to concurrent writers, and must execute the composite completion
//! (stage update + attribution insert + guarded pipeline update) as a single
//! atomic unit.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use showrun_core::domain::attribution::Attribution;
use showrun_core::domain::pipeline::{Pipeline, PipelineStatus};
use showrun_core::domain::stage::{Stage, StageStatus};
use showrun_core::dto::pipeline::PipelineDetail;
use showrun_core::registry::StageName;

pub use memory::MemStore;
pub use postgres::PgStore;

/// Store error type
#[derive(Debug)]
pub enum StoreError {
    /// The backing store rejected or lost the operation after bounded
    /// retries.
    Backend(String),
    /// Stored data could not be decoded into domain types.
    Corrupt(String),
}

/// Field updates applied by a conditional stage write. `status` is always
/// written; the optional fields are written only when set.
#[derive(Debug, Clone)]
pub struct StageUpdate {
    pub status: StageStatus,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    pub output: Option<serde_json::Value>,
    pub artifacts: Option<Vec<String>>,
    pub error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StageUpdate {
    fn status_only(status: StageStatus) -> Self {
        Self {
            status,
            agent_id: None,
            agent_name: None,
            output: None,
            artifacts: None,
            error: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// PENDING → CLAIMED, stamping the owner and `claimed_at`.
    pub fn claim(agent_id: String, agent_name: String) -> Self {
        let mut update = Self::status_only(StageStatus::Claimed);
        update.agent_id = Some(agent_id);
        update.agent_name = Some(agent_name);
        update.claimed_at = Some(Utc::now());
        update
    }

    /// CLAIMED → RUNNING, stamping `started_at`.
    pub fn start() -> Self {
        let mut update = Self::status_only(StageStatus::Running);
        update.started_at = Some(Utc::now());
        update
    }

    /// {CLAIMED, RUNNING} → COMPLETE with the handler output.
    pub fn complete(output: serde_json::Value, artifacts: Vec<String>) -> Self {
        let mut update = Self::status_only(StageStatus::Complete);
        update.output = Some(output);
        update.artifacts = Some(artifacts);
        update.completed_at = Some(Utc::now());
        update
    }

    /// {CLAIMED, RUNNING} → FAILED with the error text.
    pub fn fail(error: String) -> Self {
        let mut update = Self::status_only(StageStatus::Failed);
        update.error = Some(error);
        update.completed_at = Some(Utc::now());
        update
    }
}

/// Pipeline movement applied alongside a stage transition. The store applies
/// it only while the pipeline is still RUNNING, so a pipeline that entered
/// FAILED concurrently is never resurrected.
#[derive(Debug, Clone)]
pub struct PipelineAdvance {
    pub current_stage: Option<StageName>,
    pub status: Option<PipelineStatus>,
}

impl PipelineAdvance {
    /// Move the pointer to the next stage.
    pub fn to_stage(next: StageName) -> Self {
        Self {
            current_stage: Some(next),
            status: None,
        }
    }

    /// Terminate the pipeline.
    pub fn terminate(status: PipelineStatus) -> Self {
        Self {
            current_stage: None,
            status: Some(status),
        }
    }
}

/// The persistent store port.
///
/// Conditional writes return `Ok(None)` when the expected-status guard did
/// not match; callers translate that into the appropriate typed error.
#[async_trait]
pub trait Store: Send + Sync {
    /// Inserts a pipeline and all of its stage slots in one atomic write.
    async fn create_pipeline_with_stages(
        &self,
        pipeline: &Pipeline,
        stages: &[Stage],
    ) -> Result<(), StoreError>;

    async fn find_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>, StoreError>;

    /// All stages of a pipeline, in execution order.
    async fn find_pipeline_stages(&self, pipeline_id: Uuid) -> Result<Vec<Stage>, StoreError>;

    async fn find_stage(
        &self,
        pipeline_id: Uuid,
        name: StageName,
    ) -> Result<Option<Stage>, StoreError>;

    async fn find_stage_by_id(&self, stage_id: Uuid) -> Result<Option<Stage>, StoreError>;

    /// Pipelines, most recently created first.
    async fn list_pipelines(
        &self,
        status: Option<PipelineStatus>,
        limit: u32,
    ) -> Result<Vec<Pipeline>, StoreError>;

    /// Every RUNNING pipeline with its ordered stages, oldest pipeline first.
    async fn list_running_pipelines_with_stages(&self)
    -> Result<Vec<PipelineDetail>, StoreError>;

    /// Atomic conditional stage write. Applies `update` only if the stage's
    /// current status is one of `expected`; returns the updated stage, or
    /// `None` if the guard did not match.
    async fn compare_and_update_stage(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
    ) -> Result<Option<Stage>, StoreError>;

    /// Unconditional pipeline update (status and/or current_stage).
    async fn update_pipeline(
        &self,
        id: Uuid,
        status: Option<PipelineStatus>,
        current_stage: Option<StageName>,
    ) -> Result<(), StoreError>;

    /// Inserts an attribution, guarded by the uniqueness constraint on
    /// `(pipeline_id, stage_name)`. Returns `false` when a row already
    /// existed (the insert is a no-op).
    async fn append_attribution(&self, attribution: &Attribution) -> Result<bool, StoreError>;

    /// Attributions of a pipeline, in stage order.
    async fn list_attributions(&self, pipeline_id: Uuid) -> Result<Vec<Attribution>, StoreError>;

    /// The composite completion: conditional stage update, attribution
    /// insert, and guarded pipeline advance in one atomic unit.
    async fn complete_stage_atomic(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
        attribution: &Attribution,
        advance: PipelineAdvance,
    ) -> Result<Option<Stage>, StoreError>;

    /// Conditional stage failure plus guarded pipeline termination in one
    /// atomic unit. No attribution is recorded.
    async fn fail_stage_atomic(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
        advance: PipelineAdvance,
    ) -> Result<Option<Stage>, StoreError>;
}

/// Applies a `StageUpdate` to an in-memory stage value. Shared by the
/// in-memory store and row reconstruction.
pub(crate) fn apply_stage_update(stage: &mut Stage, update: &StageUpdate) {
    stage.status = update.status;
    if let Some(agent_id) = &update.agent_id {
        stage.agent_id = Some(agent_id.clone());
    }
    if let Some(agent_name) = &update.agent_name {
        stage.agent_name = Some(agent_name.clone());
    }
    if let Some(output) = &update.output {
        stage.output = Some(output.clone());
    }
    if let Some(artifacts) = &update.artifacts {
        stage.artifacts = artifacts.clone();
    }
    if let Some(error) = &update.error {
        stage.error = Some(error.clone());
    }
    if let Some(claimed_at) = update.claimed_at {
        stage.claimed_at = Some(claimed_at);
    }
    if let Some(started_at) = update.started_at {
        stage.started_at = Some(started_at);
    }
    if let Some(completed_at) = update.completed_at {
        stage.completed_at = Some(completed_at);
    }
}
