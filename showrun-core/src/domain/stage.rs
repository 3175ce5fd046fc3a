//! Stage domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::StageName;

/// One slot within a pipeline, executed by exactly one agent.
///
/// Identity is the composite `(pipeline_id, name)`; `id` is a surrogate for
/// addressing a stage directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: StageName,
    pub status: StageStatus,
    pub agent_id: Option<String>,
    pub agent_name: Option<String>,
    /// Handler output, stored verbatim. The orchestrator never parses it.
    pub output: Option<serde_json::Value>,
    /// Opaque artifact handles (URLs or storage keys), in handler order.
    pub artifacts: Vec<String>,
    pub error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Stage {
    /// Creates a PENDING stage slot for a pipeline.
    pub fn pending(pipeline_id: Uuid, name: StageName) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id,
            name,
            status: StageStatus::Pending,
            agent_id: None,
            agent_name: None,
            output: None,
            artifacts: Vec::new(),
            error: None,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Stage lifecycle status
///
/// ```text
///            claim                  start                 complete
/// PENDING ───────────▶ CLAIMED ──────────▶ RUNNING ───────────▶ COMPLETE
///    │                    │ fail              │ fail
///    └─▶ SKIPPED          ▼                   ▼
///                      FAILED              FAILED
/// ```
///
/// COMPLETE, FAILED, and SKIPPED are terminal. SKIPPED satisfies the
/// ordering rule for successors but is never produced by normal flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StageStatus {
    Pending,
    Claimed,
    Running,
    Complete,
    Failed,
    Skipped,
}

impl StageStatus {
    /// A terminal stage is immutable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageStatus::Complete | StageStatus::Failed | StageStatus::Skipped
        )
    }

    /// Whether a successor stage may be claimed once this predecessor holds
    /// this status.
    pub fn unblocks_successor(self) -> bool {
        matches!(self, StageStatus::Complete | StageStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Claimed => "CLAIMED",
            StageStatus::Running => "RUNNING",
            StageStatus::Complete => "COMPLETE",
            StageStatus::Failed => "FAILED",
            StageStatus::Skipped => "SKIPPED",
        }
    }

    pub fn parse(s: &str) -> Option<StageStatus> {
        match s {
            "PENDING" => Some(StageStatus::Pending),
            "CLAIMED" => Some(StageStatus::Claimed),
            "RUNNING" => Some(StageStatus::Running),
            "COMPLETE" => Some(StageStatus::Complete),
            "FAILED" => Some(StageStatus::Failed),
            "SKIPPED" => Some(StageStatus::Skipped),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
