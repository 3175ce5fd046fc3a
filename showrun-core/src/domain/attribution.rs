//! Attribution domain types
//!
//! An attribution is an immutable fact: a particular agent earned a named
//! stage's weight in a particular pipeline. At most one attribution exists
//! per `(pipeline_id, stage_name)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::StageName;

/// Credit for one completed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribution {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub stage_id: Uuid,
    pub stage_name: StageName,
    pub agent_id: String,
    pub agent_name: String,
    /// The static registry weight of `stage_name`, in whole percent.
    pub percentage: u32,
    pub created_at: DateTime<Utc>,
}

impl Attribution {
    /// Creates an attribution carrying the registry weight for the stage.
    pub fn new(
        pipeline_id: Uuid,
        stage_id: Uuid,
        stage_name: StageName,
        agent_id: String,
        agent_name: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            stage_id,
            stage_name,
            agent_id,
            agent_name,
            percentage: stage_name.weight(),
            created_at: Utc::now(),
        }
    }
}

/// The `(stage, agent)` pair a distribution is computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCredit {
    pub stage_name: StageName,
    pub agent_id: String,
}

impl From<&Attribution> for StageCredit {
    fn from(attribution: &Attribution) -> Self {
        Self {
            stage_name: attribution.stage_name,
            agent_id: attribution.agent_id.clone(),
        }
    }
}
