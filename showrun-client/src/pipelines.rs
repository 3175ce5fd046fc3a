//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use showrun_core::domain::pipeline::{Pipeline, PipelineStatus};
use showrun_core::dto::pipeline::{CreatePipeline, PipelineDetail, PipelineSummary};
use uuid::Uuid;

impl OrchestratorClient {
    /// Create a new pipeline with its seven PENDING stages
    pub async fn create_pipeline(&self, req: CreatePipeline) -> Result<PipelineDetail> {
        let url = format!("{}/pipeline/create", self.base_url);
        let response = self.client.post(&url).json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Start a pipeline: DRAFT → RUNNING
    pub async fn start_pipeline(&self, pipeline_id: Uuid) -> Result<Pipeline> {
        let url = format!("{}/pipeline/{}/start", self.base_url, pipeline_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a pipeline with its ordered stages
    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<PipelineDetail> {
        let url = format!("{}/pipeline/{}", self.base_url, pipeline_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// List pipelines, most recent first
    ///
    /// # Arguments
    /// * `status` - Optional status filter
    /// * `limit` - Maximum number of pipelines to return
    pub async fn list_pipelines(
        &self,
        status: Option<PipelineStatus>,
        limit: u32,
    ) -> Result<Vec<PipelineSummary>> {
        let url = format!("{}/pipeline/list", self.base_url);
        let mut request = self.client.get(&url).query(&[("limit", limit.to_string())]);
        if let Some(status) = status {
            request = request.query(&[("status", status.as_str())]);
        }
        let response = request.send().await?;

        self.handle_response(response).await
    }
}
