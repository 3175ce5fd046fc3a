//! Stage-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use showrun_core::domain::stage::Stage;
use showrun_core::dto::stage::{ClaimStage, CompleteStage, FailStage, ReadyStage, StageTransition};
use showrun_core::registry::StageName;
use uuid::Uuid;

impl OrchestratorClient {
    /// List the ready set: claimable stages, earliest stage order first,
    /// oldest pipeline first
    ///
    /// # Arguments
    /// * `capabilities` - Restrict to stages this worker can execute; an
    ///   empty slice applies no capability filter
    /// * `stage` - Restrict to a single stage name
    pub async fn list_ready_stages(
        &self,
        capabilities: &[StageName],
        stage: Option<StageName>,
    ) -> Result<Vec<ReadyStage>> {
        let url = format!("{}/stage/ready", self.base_url);
        let mut request = self.client.get(&url);
        if !capabilities.is_empty() {
            let joined = capabilities
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(",");
            request = request.query(&[("capabilities", joined)]);
        }
        if let Some(stage) = stage {
            request = request.query(&[("stage", stage.as_str())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }

    /// Claim a PENDING stage for an agent
    ///
    /// A lost race surfaces as an API error with status 412; check it with
    /// [`crate::ClientError::is_precondition_failed`] and move on to other
    /// work.
    pub async fn claim_stage(
        &self,
        stage_id: Uuid,
        agent_id: &str,
        agent_name: &str,
    ) -> Result<Stage> {
        let url = format!("{}/stage/{}/claim", self.base_url, stage_id);
        let response = self
            .client
            .post(&url)
            .json(&ClaimStage {
                agent_id: agent_id.to_string(),
                agent_name: agent_name.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Start a claimed stage: CLAIMED → RUNNING
    pub async fn start_stage(&self, stage_id: Uuid) -> Result<Stage> {
        let url = format!("{}/stage/{}/start", self.base_url, stage_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Complete a stage with its output and artifact handles
    pub async fn complete_stage(
        &self,
        stage_id: Uuid,
        output: serde_json::Value,
        artifacts: Vec<String>,
    ) -> Result<StageTransition> {
        let url = format!("{}/stage/{}/complete", self.base_url, stage_id);
        let response = self
            .client
            .post(&url)
            .json(&CompleteStage { output, artifacts })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fail a stage, taking its pipeline to FAILED
    pub async fn fail_stage(&self, stage_id: Uuid, error: &str) -> Result<StageTransition> {
        let url = format!("{}/stage/{}/fail", self.base_url, stage_id);
        let response = self
            .client
            .post(&url)
            .json(&FailStage {
                error: error.to_string(),
            })
            .send()
            .await?;

        self.handle_response(response).await
    }
}
