//! Stage reaper
//!
//! A worker that dies mid-stage leaves it stuck in CLAIMED or RUNNING. The
//! reaper periodically fails stages whose claim or start timestamp is older
//! than a deployment-defined deadline. It goes through the same conditional
//! writes as everything else, so a worker that finishes at the last moment
//! wins the race and the sweep backs off.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use showrun_core::domain::stage::StageStatus;

use crate::service::scheduler::{self, SchedulerError};
use crate::store::Store;

/// Fails every stage stuck in CLAIMED or RUNNING for longer than
/// `stage_timeout`. Returns the number of stages reaped.
pub async fn sweep(
    store: &dyn Store,
    stage_timeout: chrono::Duration,
) -> Result<usize, SchedulerError> {
    let cutoff = Utc::now() - stage_timeout;
    let running = store.list_running_pipelines_with_stages().await?;

    let mut reaped = 0;
    for detail in running {
        for stage in detail.stages {
            let stuck_since = match stage.status {
                StageStatus::Claimed => stage.claimed_at,
                StageStatus::Running => stage.started_at,
                _ => None,
            };
            if !stuck_since.is_some_and(|t| t < cutoff) {
                continue;
            }

            let error = format!(
                "abandoned: no progress for over {}s",
                stage_timeout.num_seconds()
            );
            match scheduler::fail_stage(store, stage.id, error).await {
                Ok(transition) => {
                    reaped += 1;
                    tracing::warn!(
                        "Reaped stage {} of pipeline {} (claimed by {})",
                        transition.stage.name,
                        transition.stage.pipeline_id,
                        transition.stage.agent_id.as_deref().unwrap_or("unknown")
                    );
                }
                // The owning agent finished first; its transition stands.
                Err(SchedulerError::InvalidState(_))
                | Err(SchedulerError::PreconditionFailed(_)) => {}
                Err(err) => return Err(err),
            }
        }
    }

    Ok(reaped)
}

/// Runs the sweep on an interval until the process exits.
pub async fn run(store: Arc<dyn Store>, interval: Duration, stage_timeout: chrono::Duration) {
    tracing::info!(
        "Starting stage reaper (interval: {:?}, timeout: {}s)",
        interval,
        stage_timeout.num_seconds()
    );

    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match sweep(store.as_ref(), stage_timeout).await {
            Ok(0) => {}
            Ok(reaped) => tracing::info!("Reaped {} abandoned stage(s)", reaped),
            Err(err) => tracing::error!("Reaper sweep failed: {:?}", err),
        }
    }
}
