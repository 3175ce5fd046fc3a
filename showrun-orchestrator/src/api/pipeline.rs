//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use showrun_core::domain::pipeline::{Pipeline, PipelineStatus};
use showrun_core::dto::pipeline::{CreatePipeline, PipelineDetail, PipelineSummary};

use crate::api::error::ApiResult;
use crate::service::scheduler;
use crate::store::Store;

const DEFAULT_LIST_LIMIT: u32 = 50;

/// POST /pipeline/create
/// Create a new pipeline with its seven PENDING stages
pub async fn create_pipeline(
    State(store): State<Arc<dyn Store>>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<Json<PipelineDetail>> {
    tracing::info!("Creating pipeline: {}", req.topic);

    let detail = scheduler::create_pipeline(store.as_ref(), req).await?;

    Ok(Json(detail))
}

/// POST /pipeline/{id}/start
/// Start a pipeline: DRAFT → RUNNING
pub async fn start_pipeline(
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Pipeline>> {
    tracing::info!("Starting pipeline: {}", id);

    let pipeline = scheduler::start_pipeline(store.as_ref(), id).await?;

    Ok(Json(pipeline))
}

#[derive(Debug, Deserialize)]
pub struct ListPipelinesQuery {
    pub status: Option<PipelineStatus>,
    pub limit: Option<u32>,
}

/// GET /pipeline/list
/// List pipelines, most recent first
pub async fn list_pipelines(
    State(store): State<Arc<dyn Store>>,
    Query(params): Query<ListPipelinesQuery>,
) -> ApiResult<Json<Vec<PipelineSummary>>> {
    tracing::debug!("Listing pipelines (status: {:?})", params.status);

    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let pipelines = scheduler::list_pipelines(store.as_ref(), params.status, limit).await?;

    Ok(Json(pipelines))
}

/// GET /pipeline/{id}
/// Get a pipeline with its ordered stages
pub async fn get_pipeline(
    State(store): State<Arc<dyn Store>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineDetail>> {
    tracing::debug!("Getting pipeline: {}", id);

    let detail = scheduler::get_pipeline(store.as_ref(), id).await?;

    Ok(Json(detail))
}
