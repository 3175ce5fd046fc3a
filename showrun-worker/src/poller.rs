//! Stage poller
//!
//! Polls the orchestrator for ready stages matching this worker's
//! capabilities and executes them. Each stage runs in its own task; a
//! semaphore caps how many run at once. A lost claim is benign: another
//! agent won, and the poller simply moves on without retrying.

use anyhow::{Context as AnyhowContext, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time;
use tracing::{debug, error, info, warn};

use showrun_client::OrchestratorClient;
use showrun_core::contract::HandlerRegistry;
use showrun_core::dto::stage::ReadyStage;
use showrun_core::registry::StageName;

use crate::config::WorkerConfig;
use crate::dispatch;

/// Stage poller that continuously polls for and executes ready stages
pub struct StagePoller {
    config: WorkerConfig,
    client: Arc<OrchestratorClient>,
    registry: Arc<HandlerRegistry>,
    semaphore: Arc<Semaphore>,
}

impl StagePoller {
    /// Creates a new stage poller
    pub fn new(
        config: WorkerConfig,
        client: Arc<OrchestratorClient>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_stages));
        Self {
            config,
            client,
            registry,
            semaphore,
        }
    }

    /// The stages this worker will ask for: the configured capabilities
    /// narrowed to what the handler registry can actually execute.
    fn effective_capabilities(&self) -> Vec<StageName> {
        let registered = self.registry.capabilities();
        if self.config.capabilities.is_empty() {
            registered
        } else {
            registered
                .into_iter()
                .filter(|stage| self.config.capabilities.contains(stage))
                .collect()
        }
    }

    /// Starts the polling loop
    pub async fn run(&self) -> Result<()> {
        let capabilities = self.effective_capabilities();
        if capabilities.is_empty() {
            anyhow::bail!("no executable stages: handler registry and capabilities do not overlap");
        }

        info!(
            "Starting stage poller as {} (interval: {:?}, capabilities: {:?})",
            self.config.agent_id, self.config.poll_interval, capabilities
        );

        let mut interval = time::interval(self.config.poll_interval);

        loop {
            interval.tick().await;

            debug!("Polling for ready stages");

            match self.poll_and_execute_once(&capabilities).await {
                Ok(executed) => {
                    if executed > 0 {
                        info!("Executed {} stage(s) this cycle", executed);
                    }
                }
                Err(e) => {
                    error!("Error during poll cycle: {:#}", e);
                }
            }
        }
    }

    /// Performs a single poll cycle
    async fn poll_and_execute_once(&self, capabilities: &[StageName]) -> Result<usize> {
        let ready = self
            .client
            .list_ready_stages(capabilities, None)
            .await
            .context("Failed to fetch ready stages")?;

        if ready.is_empty() {
            debug!("No ready stages");
            return Ok(0);
        }

        info!("Found {} ready stage(s)", ready.len());

        let mut handles = Vec::new();

        for entry in ready {
            // Try to acquire semaphore permit, skip if at max capacity
            if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                let handle = self.spawn_stage_task(entry, permit);
                handles.push(handle);
            } else {
                debug!("Max parallel stages reached, deferring the rest of the ready set");
                break;
            }
        }

        let num_stages = handles.len();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Stage task panicked: {}", e);
            }
        }

        Ok(num_stages)
    }

    /// Spawns a task to claim and execute a single ready stage
    fn spawn_stage_task(
        &self,
        entry: ReadyStage,
        _permit: tokio::sync::OwnedSemaphorePermit,
    ) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(&self.client);
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::execute_stage(entry, config, client, registry).await {
                error!("Failed to execute stage: {:#}", e);
            }
            // Permit is automatically released when dropped
        })
    }

    /// Claims one ready stage and drives it through its handler
    async fn execute_stage(
        entry: ReadyStage,
        config: WorkerConfig,
        client: Arc<OrchestratorClient>,
        registry: Arc<HandlerRegistry>,
    ) -> Result<()> {
        let claimed = match client
            .claim_stage(entry.stage.id, &config.agent_id, &config.agent_name)
            .await
        {
            Ok(stage) => stage,
            Err(err) if err.is_precondition_failed() => {
                debug!(
                    "Lost claim for stage {} of pipeline {}: {}",
                    entry.stage.name, entry.pipeline.id, err
                );
                return Ok(());
            }
            Err(err) => return Err(err).context("Failed to claim stage"),
        };

        info!(
            "Claimed stage {} of pipeline {}",
            claimed.name, claimed.pipeline_id
        );

        dispatch::run_claimed_stage(&client, &registry, &claimed, config.dry_run).await
    }
}
