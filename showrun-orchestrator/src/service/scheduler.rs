//! Pipeline scheduler
//!
//! The state machine that drives pipelines from intake to terminal state:
//! creates them, surfaces the ready set of claimable stages, and moves
//! stages through claim/start/complete/fail with exclusive conditional
//! writes. All mutations funnel through the store's compare-and-update
//! primitives, so concurrent claimers race safely and at most one wins.

use uuid::Uuid;

use showrun_core::domain::pipeline::{Pipeline, PipelineStatus};
use showrun_core::domain::stage::{Stage, StageStatus};
use showrun_core::dto::pipeline::{CreatePipeline, PipelineDetail, PipelineSummary};
use showrun_core::dto::stage::{ReadyStage, StageTransition};
use showrun_core::registry::StageName;

use crate::service::attribution;
use crate::store::{PipelineAdvance, StageUpdate, Store, StoreError};

const MAX_TOPIC_LEN: usize = 500;
const MAX_LIST_LIMIT: u32 = 500;

/// Service error type
#[derive(Debug)]
pub enum SchedulerError {
    InvalidInput(String),
    NotFound(String),
    InvalidState(String),
    PreconditionFailed(String),
    Store(StoreError),
}

impl From<StoreError> for SchedulerError {
    fn from(err: StoreError) -> Self {
        SchedulerError::Store(err)
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Create a new pipeline in DRAFT with its seven PENDING stage slots.
pub async fn create_pipeline(store: &dyn Store, req: CreatePipeline) -> Result<PipelineDetail> {
    let topic = req.topic.trim();
    if topic.is_empty() {
        return Err(SchedulerError::InvalidInput(
            "topic cannot be empty".to_string(),
        ));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(SchedulerError::InvalidInput(format!(
            "topic is too long (max {} characters)",
            MAX_TOPIC_LEN
        )));
    }

    let pipeline = Pipeline::draft(topic.to_string(), req.description);
    let stages: Vec<Stage> = StageName::all()
        .iter()
        .map(|name| Stage::pending(pipeline.id, *name))
        .collect();

    store.create_pipeline_with_stages(&pipeline, &stages).await?;

    tracing::info!("Pipeline created: {} ({})", pipeline.topic, pipeline.id);

    Ok(PipelineDetail { pipeline, stages })
}

/// Start a pipeline: DRAFT → RUNNING.
pub async fn start_pipeline(store: &dyn Store, id: Uuid) -> Result<Pipeline> {
    let pipeline = store
        .find_pipeline(id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("pipeline {} not found", id)))?;

    if pipeline.status != PipelineStatus::Draft {
        return Err(SchedulerError::InvalidState(format!(
            "pipeline {} is not DRAFT (current: {})",
            id, pipeline.status
        )));
    }

    store
        .update_pipeline(id, Some(PipelineStatus::Running), None)
        .await?;

    tracing::info!("Pipeline started: {}", id);

    store
        .find_pipeline(id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("pipeline {} not found", id)))
}

/// The ready set: for every RUNNING pipeline, its earliest PENDING stage
/// whose predecessor is COMPLETE or SKIPPED (or which has no predecessor).
///
/// Sorted by stage order ascending, then pipeline creation time ascending,
/// so workers pick up the earliest/oldest work first. The output is
/// advisory; only the atomic claim confirms ownership.
pub async fn ready_set(
    store: &dyn Store,
    capabilities: Option<&[StageName]>,
    stage_filter: Option<StageName>,
) -> Result<Vec<ReadyStage>> {
    let running = store.list_running_pipelines_with_stages().await?;

    let mut ready: Vec<ReadyStage> = Vec::new();
    for detail in running {
        let Some(stage) = claimable_stage(&detail.stages) else {
            continue;
        };
        if let Some(filter) = stage_filter {
            if stage.name != filter {
                continue;
            }
        }
        if let Some(capabilities) = capabilities {
            if !capabilities.contains(&stage.name) {
                continue;
            }
        }
        ready.push(ReadyStage {
            pipeline: PipelineSummary::from(detail.pipeline.clone()),
            stage: stage.clone(),
        });
    }

    ready.sort_by(|a, b| {
        a.stage
            .name
            .order_index()
            .cmp(&b.stage.name.order_index())
            .then(a.pipeline.created_at.cmp(&b.pipeline.created_at))
    });

    Ok(ready)
}

/// The single claimable stage of a pipeline, if any: the earliest PENDING
/// stage, provided its predecessor (when it has one) unblocks it.
fn claimable_stage(stages: &[Stage]) -> Option<&Stage> {
    let earliest_pending = stages.iter().find(|s| s.status == StageStatus::Pending)?;
    match earliest_pending.name.predecessor() {
        None => Some(earliest_pending),
        Some(predecessor) => {
            let unblocked = stages
                .iter()
                .find(|s| s.name == predecessor)
                .is_some_and(|s| s.status.unblocks_successor());
            unblocked.then_some(earliest_pending)
        }
    }
}

/// Claim a PENDING stage for an agent: an exclusive PENDING → CLAIMED
/// transition. When two agents race, at most one wins; the loser gets
/// `PreconditionFailed` and must re-read state before trying other work.
pub async fn claim_stage(
    store: &dyn Store,
    pipeline_id: Uuid,
    stage_name: StageName,
    agent_id: String,
    agent_name: String,
) -> Result<Stage> {
    if agent_id.trim().is_empty() {
        return Err(SchedulerError::InvalidInput(
            "agent_id cannot be empty".to_string(),
        ));
    }

    let pipeline = store.find_pipeline(pipeline_id).await?.ok_or_else(|| {
        SchedulerError::NotFound(format!("pipeline {} not found", pipeline_id))
    })?;

    let stage = store
        .find_stage(pipeline_id, stage_name)
        .await?
        .ok_or_else(|| {
            SchedulerError::NotFound(format!(
                "stage {} of pipeline {} not found",
                stage_name, pipeline_id
            ))
        })?;

    if pipeline.status != PipelineStatus::Running {
        return Err(SchedulerError::PreconditionFailed(format!(
            "pipeline {} is not RUNNING (current: {})",
            pipeline_id, pipeline.status
        )));
    }

    if stage.status != StageStatus::Pending {
        return Err(SchedulerError::PreconditionFailed(format!(
            "stage {} is not PENDING (current: {})",
            stage_name, stage.status
        )));
    }

    if let Some(predecessor) = stage_name.predecessor() {
        let unblocked = store
            .find_stage(pipeline_id, predecessor)
            .await?
            .is_some_and(|s| s.status.unblocks_successor());
        if !unblocked {
            return Err(SchedulerError::PreconditionFailed(format!(
                "stage {} is blocked: predecessor {} has not completed",
                stage_name, predecessor
            )));
        }
    }

    let claimed = store
        .compare_and_update_stage(
            stage.id,
            &[StageStatus::Pending],
            StageUpdate::claim(agent_id.clone(), agent_name),
        )
        .await?
        .ok_or_else(|| {
            SchedulerError::PreconditionFailed(format!(
                "stage {} was claimed by another agent",
                stage_name
            ))
        })?;

    tracing::info!(
        "Stage {} of pipeline {} claimed by {}",
        stage_name,
        pipeline_id,
        agent_id
    );

    Ok(claimed)
}

/// Claim a stage addressed by its surrogate id.
pub async fn claim_stage_by_id(
    store: &dyn Store,
    stage_id: Uuid,
    agent_id: String,
    agent_name: String,
) -> Result<Stage> {
    let stage = store
        .find_stage_by_id(stage_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("stage {} not found", stage_id)))?;

    claim_stage(store, stage.pipeline_id, stage.name, agent_id, agent_name).await
}

/// Start a claimed stage: CLAIMED → RUNNING.
pub async fn start_stage(store: &dyn Store, stage_id: Uuid) -> Result<Stage> {
    let stage = store
        .find_stage_by_id(stage_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("stage {} not found", stage_id)))?;

    store
        .compare_and_update_stage(stage_id, &[StageStatus::Claimed], StageUpdate::start())
        .await?
        .ok_or_else(|| {
            SchedulerError::InvalidState(format!(
                "stage {} is not CLAIMED (current: {})",
                stage_id, stage.status
            ))
        })
}

/// Complete a stage: {CLAIMED, RUNNING} → COMPLETE.
///
/// In the same atomic unit the store appends the attribution for the owning
/// agent and moves the pipeline: to COMPLETE when this was the terminal
/// stage, otherwise forward to the next stage. A pipeline that already left
/// RUNNING keeps its terminal status.
pub async fn complete_stage(
    store: &dyn Store,
    stage_id: Uuid,
    output: serde_json::Value,
    artifacts: Vec<String>,
) -> Result<StageTransition> {
    let stage = store
        .find_stage_by_id(stage_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("stage {} not found", stage_id)))?;

    if !matches!(stage.status, StageStatus::Claimed | StageStatus::Running) {
        return Err(SchedulerError::InvalidState(format!(
            "stage {} cannot complete from {}",
            stage_id, stage.status
        )));
    }

    let attribution = attribution::for_stage(&stage).ok_or_else(|| {
        SchedulerError::InvalidState(format!("stage {} has no owning agent", stage_id))
    })?;

    let advance = match stage.name.next() {
        Some(next) => PipelineAdvance::to_stage(next),
        None => PipelineAdvance::terminate(PipelineStatus::Complete),
    };

    let completed = store
        .complete_stage_atomic(
            stage_id,
            &[StageStatus::Claimed, StageStatus::Running],
            StageUpdate::complete(output, artifacts),
            &attribution,
            advance,
        )
        .await?
        .ok_or_else(|| {
            SchedulerError::InvalidState(format!(
                "stage {} changed state before completion",
                stage_id
            ))
        })?;

    let pipeline = store
        .find_pipeline(completed.pipeline_id)
        .await?
        .ok_or_else(|| {
            SchedulerError::NotFound(format!("pipeline {} not found", completed.pipeline_id))
        })?;

    tracing::info!(
        "Stage {} of pipeline {} completed by {} (pipeline now {})",
        completed.name,
        completed.pipeline_id,
        attribution.agent_id,
        pipeline.status
    );

    Ok(StageTransition {
        stage: completed,
        pipeline,
    })
}

/// Fail a stage: {CLAIMED, RUNNING} → FAILED, taking the pipeline to FAILED
/// with it. No attribution is recorded for a failed stage.
pub async fn fail_stage(
    store: &dyn Store,
    stage_id: Uuid,
    error: String,
) -> Result<StageTransition> {
    let stage = store
        .find_stage_by_id(stage_id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("stage {} not found", stage_id)))?;

    if !matches!(stage.status, StageStatus::Claimed | StageStatus::Running) {
        return Err(SchedulerError::InvalidState(format!(
            "stage {} cannot fail from {}",
            stage_id, stage.status
        )));
    }

    let failed = store
        .fail_stage_atomic(
            stage_id,
            &[StageStatus::Claimed, StageStatus::Running],
            StageUpdate::fail(error),
            PipelineAdvance::terminate(PipelineStatus::Failed),
        )
        .await?
        .ok_or_else(|| {
            SchedulerError::InvalidState(format!("stage {} changed state before failure", stage_id))
        })?;

    let pipeline = store
        .find_pipeline(failed.pipeline_id)
        .await?
        .ok_or_else(|| {
            SchedulerError::NotFound(format!("pipeline {} not found", failed.pipeline_id))
        })?;

    tracing::warn!(
        "Stage {} of pipeline {} failed: {}",
        failed.name,
        failed.pipeline_id,
        failed.error.as_deref().unwrap_or("unknown")
    );

    Ok(StageTransition {
        stage: failed,
        pipeline,
    })
}

/// Get a pipeline with its stages in execution order.
pub async fn get_pipeline(store: &dyn Store, id: Uuid) -> Result<PipelineDetail> {
    let pipeline = store
        .find_pipeline(id)
        .await?
        .ok_or_else(|| SchedulerError::NotFound(format!("pipeline {} not found", id)))?;

    let stages = store.find_pipeline_stages(id).await?;

    Ok(PipelineDetail { pipeline, stages })
}

/// List pipelines, most recent first.
pub async fn list_pipelines(
    store: &dyn Store,
    status: Option<PipelineStatus>,
    limit: u32,
) -> Result<Vec<PipelineSummary>> {
    let limit = limit.clamp(1, MAX_LIST_LIMIT);
    let pipelines = store.list_pipelines(status, limit).await?;
    Ok(pipelines.into_iter().map(PipelineSummary::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use serde_json::json;
    use showrun_core::domain::attribution::StageCredit;

    fn create_req(topic: &str) -> CreatePipeline {
        CreatePipeline {
            topic: topic.to_string(),
            description: None,
        }
    }

    async fn running_pipeline(store: &MemStore, topic: &str) -> PipelineDetail {
        let detail = create_pipeline(store, create_req(topic)).await.unwrap();
        start_pipeline(store, detail.pipeline.id).await.unwrap();
        detail
    }

    /// Claims and completes one stage on behalf of an agent.
    async fn run_stage(
        store: &MemStore,
        pipeline_id: Uuid,
        name: StageName,
        agent_id: &str,
        agent_name: &str,
    ) -> StageTransition {
        let claimed = claim_stage(
            store,
            pipeline_id,
            name,
            agent_id.to_string(),
            agent_name.to_string(),
        )
        .await
        .unwrap();
        start_stage(store, claimed.id).await.unwrap();
        complete_stage(store, claimed.id, json!({ "stage": name.as_str() }), vec![])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_pipeline_has_seven_pending_stages() {
        let store = MemStore::new();
        let detail = create_pipeline(&store, create_req("Why cats purr"))
            .await
            .unwrap();

        assert_eq!(detail.pipeline.status, PipelineStatus::Draft);
        assert_eq!(detail.pipeline.current_stage, StageName::Research);
        assert_eq!(detail.stages.len(), 7);
        assert!(
            detail
                .stages
                .iter()
                .all(|s| s.status == StageStatus::Pending)
        );

        let names: Vec<StageName> = detail.stages.iter().map(|s| s.name).collect();
        assert_eq!(names, StageName::all());
    }

    #[tokio::test]
    async fn test_create_pipeline_rejects_empty_topic() {
        let store = MemStore::new();
        let result = create_pipeline(&store, create_req("   ")).await;
        assert!(matches!(result, Err(SchedulerError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_then_fetch_returns_identical_attributes() {
        let store = MemStore::new();
        let created = create_pipeline(&store, create_req("Why cats purr"))
            .await
            .unwrap();

        let fetched = get_pipeline(&store, created.pipeline.id).await.unwrap();
        assert_eq!(fetched.pipeline.id, created.pipeline.id);
        assert_eq!(fetched.pipeline.topic, created.pipeline.topic);
        assert_eq!(fetched.pipeline.status, created.pipeline.status);
        assert_eq!(fetched.pipeline.created_at, created.pipeline.created_at);
        assert_eq!(fetched.stages.len(), created.stages.len());

        let listed = list_pipelines(&store, None, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].topic, "Why cats purr");
    }

    #[tokio::test]
    async fn test_start_pipeline_only_from_draft() {
        let store = MemStore::new();
        let detail = create_pipeline(&store, create_req("topic")).await.unwrap();

        let started = start_pipeline(&store, detail.pipeline.id).await.unwrap();
        assert_eq!(started.status, PipelineStatus::Running);

        let again = start_pipeline(&store, detail.pipeline.id).await;
        assert!(matches!(again, Err(SchedulerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_claim_requires_running_pipeline() {
        let store = MemStore::new();
        let detail = create_pipeline(&store, create_req("topic")).await.unwrap();

        // Pipeline is still DRAFT.
        let result = claim_stage(
            &store,
            detail.pipeline.id,
            StageName::Research,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await;
        assert!(matches!(result, Err(SchedulerError::PreconditionFailed(_))));
    }

    #[tokio::test]
    async fn test_claim_unknown_pipeline_is_not_found() {
        let store = MemStore::new();
        let result = claim_stage(
            &store,
            Uuid::new_v4(),
            StageName::Research,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await;
        assert!(matches!(result, Err(SchedulerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_out_of_order_claim_rejected_until_predecessor_completes() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;
        let pipeline_id = detail.pipeline.id;

        // RESEARCH is still PENDING, so SCRIPT is blocked.
        let blocked = claim_stage(
            &store,
            pipeline_id,
            StageName::Script,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await;
        assert!(matches!(blocked, Err(SchedulerError::PreconditionFailed(_))));

        run_stage(&store, pipeline_id, StageName::Research, "a1", "Agent One").await;

        let claimed = claim_stage(
            &store,
            pipeline_id,
            StageName::Script,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await
        .unwrap();
        assert_eq!(claimed.status, StageStatus::Claimed);
    }

    #[tokio::test]
    async fn test_claim_race_has_exactly_one_winner() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;
        let pipeline_id = detail.pipeline.id;

        let w1 = claim_stage(
            &store,
            pipeline_id,
            StageName::Research,
            "w1".to_string(),
            "Worker One".to_string(),
        );
        let w2 = claim_stage(
            &store,
            pipeline_id,
            StageName::Research,
            "w2".to_string(),
            "Worker Two".to_string(),
        );
        let (r1, r2) = tokio::join!(w1, w2);

        let winners = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = if r1.is_ok() { r2 } else { r1 };
        assert!(matches!(loser, Err(SchedulerError::PreconditionFailed(_))));

        // The stored stage carries exactly the winner's agent id.
        let stored = store
            .find_stage(pipeline_id, StageName::Research)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, StageStatus::Claimed);
        assert!(matches!(stored.agent_id.as_deref(), Some("w1") | Some("w2")));
    }

    #[tokio::test]
    async fn test_claim_twice_yields_precondition_failed() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;

        claim_stage(
            &store,
            detail.pipeline.id,
            StageName::Research,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await
        .unwrap();

        let again = claim_stage(
            &store,
            detail.pipeline.id,
            StageName::Research,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await;
        assert!(matches!(again, Err(SchedulerError::PreconditionFailed(_))));
    }

    #[tokio::test]
    async fn test_start_stage_requires_claimed() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;
        let research = &detail.stages[0];

        let result = start_stage(&store, research.id).await;
        assert!(matches!(result, Err(SchedulerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_complete_records_attribution_and_advances_pipeline() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;
        let pipeline_id = detail.pipeline.id;

        let transition =
            run_stage(&store, pipeline_id, StageName::Research, "a1", "Agent One").await;

        assert_eq!(transition.stage.status, StageStatus::Complete);
        assert!(transition.stage.completed_at.is_some());
        assert_eq!(transition.pipeline.status, PipelineStatus::Running);
        assert_eq!(transition.pipeline.current_stage, StageName::Script);

        let attributions = store.list_attributions(pipeline_id).await.unwrap();
        assert_eq!(attributions.len(), 1);
        assert_eq!(attributions[0].stage_name, StageName::Research);
        assert_eq!(attributions[0].agent_id, "a1");
        assert_eq!(attributions[0].percentage, 10);
    }

    #[tokio::test]
    async fn test_complete_twice_yields_invalid_state() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;

        let transition = run_stage(
            &store,
            detail.pipeline.id,
            StageName::Research,
            "a1",
            "Agent One",
        )
        .await;

        let again = complete_stage(&store, transition.stage.id, json!({}), vec![]).await;
        assert!(matches!(again, Err(SchedulerError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_terminal_stage_completion_completes_pipeline() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "Why cats purr").await;
        let pipeline_id = detail.pipeline.id;

        // A1 does RESEARCH, SCRIPT, VOICE, EDITOR; A2 does MUSIC, VISUAL, PUBLISH.
        let assignments = [
            (StageName::Research, "a1", "Agent One"),
            (StageName::Script, "a1", "Agent One"),
            (StageName::Voice, "a1", "Agent One"),
            (StageName::Music, "a2", "Agent Two"),
            (StageName::Visual, "a2", "Agent Two"),
            (StageName::Editor, "a1", "Agent One"),
            (StageName::Publish, "a2", "Agent Two"),
        ];
        let mut last = None;
        for (name, agent_id, agent_name) in assignments {
            last = Some(run_stage(&store, pipeline_id, name, agent_id, agent_name).await);
        }

        let final_pipeline = last.unwrap().pipeline;
        assert_eq!(final_pipeline.status, PipelineStatus::Complete);

        let attributions = store.list_attributions(pipeline_id).await.unwrap();
        assert_eq!(attributions.len(), 7);

        // distribute() splits by stage weight: A1 holds 10+25+20+15, A2 10+15+5.
        let credits: Vec<StageCredit> = attributions.iter().map(StageCredit::from).collect();
        let shares = attribution::distribute(1_000_000, &credits);
        assert_eq!(shares.get("a1"), Some(&700_000));
        assert_eq!(shares.get("a2"), Some(&300_000));
    }

    #[tokio::test]
    async fn test_failed_stage_stops_progression() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;
        let pipeline_id = detail.pipeline.id;

        run_stage(&store, pipeline_id, StageName::Research, "a1", "Agent One").await;

        let claimed = claim_stage(
            &store,
            pipeline_id,
            StageName::Script,
            "a2".to_string(),
            "Agent Two".to_string(),
        )
        .await
        .unwrap();
        let transition = fail_stage(&store, claimed.id, "llm_timeout".to_string())
            .await
            .unwrap();

        assert_eq!(transition.stage.status, StageStatus::Failed);
        assert_eq!(transition.pipeline.status, PipelineStatus::Failed);

        // No further claims: the pipeline is no longer RUNNING.
        let blocked = claim_stage(
            &store,
            pipeline_id,
            StageName::Voice,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await;
        assert!(matches!(blocked, Err(SchedulerError::PreconditionFailed(_))));

        // The error text is visible on the failed stage.
        let fetched = get_pipeline(&store, pipeline_id).await.unwrap();
        let script = fetched
            .stages
            .iter()
            .find(|s| s.name == StageName::Script)
            .unwrap();
        assert_eq!(script.error.as_deref(), Some("llm_timeout"));

        // Attribution for the completed stage survives the failure.
        let attributions = store.list_attributions(pipeline_id).await.unwrap();
        assert_eq!(attributions.len(), 1);
        assert_eq!(attributions[0].stage_name, StageName::Research);
    }

    #[tokio::test]
    async fn test_ready_set_orders_by_stage_then_age() {
        let store = MemStore::new();
        let p1 = running_pipeline(&store, "P1").await.pipeline.id;
        let p2 = running_pipeline(&store, "P2").await.pipeline.id;
        let p3 = running_pipeline(&store, "P3").await.pipeline.id;

        // Move P1 to VOICE pending; P2 and P3 stay at RESEARCH.
        run_stage(&store, p1, StageName::Research, "a1", "Agent One").await;
        run_stage(&store, p1, StageName::Script, "a1", "Agent One").await;

        let ready = ready_set(&store, None, None).await.unwrap();
        let order: Vec<(Uuid, StageName)> = ready
            .iter()
            .map(|r| (r.pipeline.id, r.stage.name))
            .collect();
        assert_eq!(
            order,
            vec![
                (p2, StageName::Research),
                (p3, StageName::Research),
                (p1, StageName::Voice),
            ]
        );
    }

    #[tokio::test]
    async fn test_ready_set_filters_by_stage_and_capability() {
        let store = MemStore::new();
        let p1 = running_pipeline(&store, "P1").await.pipeline.id;
        run_stage(&store, p1, StageName::Research, "a1", "Agent One").await;
        let _p2 = running_pipeline(&store, "P2").await;

        let scripts = ready_set(&store, None, Some(StageName::Script)).await.unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].stage.name, StageName::Script);

        // A worker that can only do VOICE sees nothing yet.
        let voices = ready_set(&store, Some(&[StageName::Voice]), None)
            .await
            .unwrap();
        assert!(voices.is_empty());
    }

    #[tokio::test]
    async fn test_complete_after_pipeline_failed_keeps_pipeline_failed() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;
        let pipeline_id = detail.pipeline.id;

        let claimed = claim_stage(
            &store,
            pipeline_id,
            StageName::Research,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await
        .unwrap();

        // The pipeline fails out-of-band while the agent is still working.
        store
            .update_pipeline(pipeline_id, Some(PipelineStatus::Failed), None)
            .await
            .unwrap();

        let transition = complete_stage(&store, claimed.id, json!({"ok": true}), vec![])
            .await
            .unwrap();
        assert_eq!(transition.stage.status, StageStatus::Complete);
        assert_eq!(transition.pipeline.status, PipelineStatus::Failed);
        assert_eq!(transition.pipeline.current_stage, StageName::Research);
    }

    #[tokio::test]
    async fn test_skipped_predecessor_unblocks_claim() {
        let store = MemStore::new();
        let detail = running_pipeline(&store, "topic").await;
        let research = &detail.stages[0];

        // Admin-style skip, applied directly at the store level.
        store
            .compare_and_update_stage(
                research.id,
                &[StageStatus::Pending],
                StageUpdate {
                    status: StageStatus::Skipped,
                    agent_id: None,
                    agent_name: None,
                    output: None,
                    artifacts: None,
                    error: None,
                    claimed_at: None,
                    started_at: None,
                    completed_at: None,
                },
            )
            .await
            .unwrap();

        let claimed = claim_stage(
            &store,
            detail.pipeline.id,
            StageName::Script,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await
        .unwrap();
        assert_eq!(claimed.status, StageStatus::Claimed);
    }
}
