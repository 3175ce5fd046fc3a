//! Worker configuration
//!
//! Defines all configurable parameters for a worker agent including polling
//! interval, capabilities, and orchestrator connection settings.

use std::time::Duration;

use showrun_core::registry::StageName;

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Stable identity of this agent; recorded on every claim and
    /// attribution
    pub agent_id: String,

    /// Human-readable agent name
    pub agent_name: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// Stages this worker is willing to execute. Empty means "everything
    /// the handler registry covers".
    pub capabilities: Vec<StageName>,

    /// How often to poll the orchestrator for ready stages
    pub poll_interval: Duration,

    /// Max stages executed concurrently
    pub max_parallel_stages: usize,

    /// Pass dry_run to handlers; no externally visible work is performed
    pub dry_run: bool,
}

impl WorkerConfig {
    /// Creates a new configuration with defaults
    pub fn new(agent_id: String, agent_name: String, orchestrator_url: String) -> Self {
        Self {
            agent_id,
            agent_name,
            orchestrator_url,
            capabilities: Vec::new(),
            poll_interval: Duration::from_secs(5),
            max_parallel_stages: 1,
            dry_run: false,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - AGENT_ID (required)
    /// - AGENT_NAME (optional, defaults to AGENT_ID)
    /// - ORCHESTRATOR_URL (required)
    /// - CAPABILITIES (optional, comma-separated stage names)
    /// - POLL_INTERVAL (optional, seconds, default: 5)
    /// - MAX_PARALLEL_STAGES (optional, default: 1)
    /// - DRY_RUN (optional, "true" to enable)
    pub fn from_env() -> anyhow::Result<Self> {
        let agent_id = std::env::var("AGENT_ID")
            .map_err(|_| anyhow::anyhow!("AGENT_ID environment variable not set"))?;

        let agent_name = std::env::var("AGENT_NAME").unwrap_or_else(|_| agent_id.clone());

        let orchestrator_url = std::env::var("ORCHESTRATOR_URL")
            .map_err(|_| anyhow::anyhow!("ORCHESTRATOR_URL environment variable not set"))?;

        let capabilities = match std::env::var("CAPABILITIES") {
            Ok(raw) => parse_capabilities(&raw)?,
            Err(_) => Vec::new(),
        };

        let poll_interval = std::env::var("POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(5));

        let max_parallel_stages = std::env::var("MAX_PARALLEL_STAGES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1);

        let dry_run = std::env::var("DRY_RUN")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        Ok(Self {
            agent_id,
            agent_name,
            orchestrator_url,
            capabilities,
            poll_interval,
            max_parallel_stages,
            dry_run,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.agent_id.trim().is_empty() {
            anyhow::bail!("agent_id cannot be empty");
        }

        if self.orchestrator_url.is_empty() {
            anyhow::bail!("orchestrator_url cannot be empty");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.as_secs() == 0 {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.max_parallel_stages == 0 {
            anyhow::bail!("max_parallel_stages must be greater than 0");
        }

        Ok(())
    }
}

/// Parses a comma-separated list of stage names.
pub fn parse_capabilities(raw: &str) -> anyhow::Result<Vec<StageName>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| StageName::parse(s).ok_or_else(|| anyhow::anyhow!("unknown stage name: {}", s)))
        .collect()
}
