//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::StageName;

/// A production run: one topic driven through all seven stages.
///
/// Structure shared between the orchestrator (persists) and workers (read).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub topic: String,
    pub description: Option<String>,
    pub status: PipelineStatus,
    /// Points at the earliest stage that has not completed. Only ever moves
    /// forward in stage order.
    pub current_stage: StageName,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pipeline {
    /// Creates a fresh DRAFT pipeline pointing at the first stage.
    pub fn draft(topic: String, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            topic,
            description,
            status: PipelineStatus::Draft,
            current_stage: StageName::first(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Pipeline lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineStatus {
    Draft,
    Running,
    Complete,
    Failed,
}

impl PipelineStatus {
    /// A terminal pipeline admits no further stage transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStatus::Complete | PipelineStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStatus::Draft => "DRAFT",
            PipelineStatus::Running => "RUNNING",
            PipelineStatus::Complete => "COMPLETE",
            PipelineStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<PipelineStatus> {
        match s {
            "DRAFT" => Some(PipelineStatus::Draft),
            "RUNNING" => Some(PipelineStatus::Running),
            "COMPLETE" => Some(PipelineStatus::Complete),
            "FAILED" => Some(PipelineStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
