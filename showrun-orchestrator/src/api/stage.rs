//! Stage API Handlers
//!
//! HTTP endpoints for the stage lifecycle: ready-set polling, claiming, and
//! completion or failure reporting by workers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use showrun_core::domain::stage::Stage;
use showrun_core::dto::stage::{ClaimStage, CompleteStage, FailStage, ReadyStage, StageTransition};
use showrun_core::registry::StageName;

use crate::api::error::{ApiError, ApiResult};
use crate::service::scheduler;
use crate::store::Store;

#[derive(Debug, Deserialize)]
pub struct ReadyQuery {
    /// Restrict to a single stage name.
    pub stage: Option<StageName>,
    /// Comma-separated stage names the polling worker can execute.
    pub capabilities: Option<String>,
}

/// GET /stage/ready
/// The ready set: claimable stages ordered earliest stage first, oldest
/// pipeline first
pub async fn list_ready_stages(
    State(store): State<Arc<dyn Store>>,
    Query(params): Query<ReadyQuery>,
) -> ApiResult<Json<Vec<ReadyStage>>> {
    tracing::debug!("Listing ready stages (filter: {:?})", params.stage);

    let capabilities = params
        .capabilities
        .as_deref()
        .map(parse_capabilities)
        .transpose()?;

    let ready = scheduler::ready_set(store.as_ref(), capabilities.as_deref(), params.stage).await?;

    Ok(Json(ready))
}

fn parse_capabilities(raw: &str) -> ApiResult<Vec<StageName>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            StageName::parse(s)
                .ok_or_else(|| ApiError::InvalidInput(format!("unknown stage name: {}", s)))
        })
        .collect()
}

/// POST /stage/{id}/claim
/// Exclusively claim a PENDING stage for an agent
pub async fn claim_stage(
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ClaimStage>,
) -> ApiResult<Json<Stage>> {
    tracing::info!("Agent {} claiming stage: {}", req.agent_id, id);

    let stage =
        scheduler::claim_stage_by_id(store.as_ref(), id, req.agent_id, req.agent_name).await?;

    Ok(Json(stage))
}

/// POST /stage/{id}/start
/// Start a claimed stage: CLAIMED → RUNNING
pub async fn start_stage(
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Stage>> {
    tracing::debug!("Starting stage: {}", id);

    let stage = scheduler::start_stage(store.as_ref(), id).await?;

    Ok(Json(stage))
}

/// POST /stage/{id}/complete
/// Complete a stage with its output and artifact handles
pub async fn complete_stage(
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteStage>,
) -> ApiResult<Json<StageTransition>> {
    tracing::info!("Completing stage: {}", id);

    let transition =
        scheduler::complete_stage(store.as_ref(), id, req.output, req.artifacts).await?;

    Ok(Json(transition))
}

/// POST /stage/{id}/fail
/// Fail a stage, taking its pipeline to FAILED
pub async fn fail_stage(
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<Uuid>,
    Json(req): Json<FailStage>,
) -> ApiResult<Json<StageTransition>> {
    tracing::info!("Failing stage: {}", id);

    let transition = scheduler::fail_stage(store.as_ref(), id, req.error).await?;

    Ok(Json(transition))
}
