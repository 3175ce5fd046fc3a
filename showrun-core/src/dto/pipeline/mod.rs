//! Pipeline DTOs for inter-service communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{Pipeline, PipelineStatus};
use crate::domain::stage::Stage;
use crate::registry::StageName;

/// Request to create a new pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub topic: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Lightweight pipeline summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub topic: String,
    pub description: Option<String>,
    pub status: PipelineStatus,
    pub current_stage: StageName,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Pipeline> for PipelineSummary {
    fn from(pipeline: Pipeline) -> Self {
        Self {
            id: pipeline.id,
            topic: pipeline.topic,
            description: pipeline.description,
            status: pipeline.status,
            current_stage: pipeline.current_stage,
            created_at: pipeline.created_at,
            updated_at: pipeline.updated_at,
        }
    }
}

/// A pipeline together with its stages in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDetail {
    pub pipeline: Pipeline,
    pub stages: Vec<Stage>,
}
