//! Stage DTOs for inter-service communication

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::Pipeline;
use crate::domain::stage::Stage;
use crate::dto::pipeline::PipelineSummary;

/// Request to claim a PENDING stage for an agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimStage {
    pub agent_id: String,
    pub agent_name: String,
}

/// Request to complete a CLAIMED or RUNNING stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteStage {
    /// Handler output, passed through verbatim.
    pub output: serde_json::Value,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Request to fail a CLAIMED or RUNNING stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailStage {
    pub error: String,
}

/// One entry of the ready set: a claimable stage with its pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyStage {
    pub pipeline: PipelineSummary,
    pub stage: Stage,
}

/// Result of completing or failing a stage: the stage plus the pipeline it
/// may have advanced or terminated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: Stage,
    pub pipeline: Pipeline,
}
