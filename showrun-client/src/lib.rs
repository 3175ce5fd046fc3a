//! Showrun HTTP Client
//!
//! A simple, type-safe HTTP client for communicating with the showrun
//! orchestrator API. Workers and other collaborators use it instead of
//! duplicating request plumbing.
//!
//! # Example
//!
//! ```no_run
//! use showrun_client::OrchestratorClient;
//! use showrun_core::dto::pipeline::CreatePipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OrchestratorClient::new("http://localhost:8080");
//!
//!     let detail = client.create_pipeline(CreatePipeline {
//!         topic: "Why cats purr".to_string(),
//!         description: None,
//!     }).await?;
//!
//!     client.start_pipeline(detail.pipeline.id).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod pipelines;
mod stages;

pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the showrun orchestrator API
///
/// Provides methods for all orchestrator endpoints:
/// - Pipeline management (create, start, get, list)
/// - Stage lifecycle (ready set, claim, start, complete, fail)
#[derive(Debug, Clone)]
pub struct OrchestratorClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl OrchestratorClient {
    /// Create a new orchestrator client
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    /// Create a new orchestrator client with a custom HTTP client, for
    /// configuring timeouts, proxies, or TLS settings.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
