//! Attribution engine
//!
//! Records which agent earned which stage's weight, and turns a set of
//! attributions into an integer split of an arbitrary total. Attribution
//! rows are immutable facts; the uniqueness constraint on
//! `(pipeline_id, stage_name)` makes recording idempotent.

use std::collections::HashMap;
use uuid::Uuid;

use showrun_core::domain::attribution::{Attribution, StageCredit};
use showrun_core::domain::stage::Stage;
use showrun_core::registry::StageName;

use crate::store::{Store, StoreError};

/// Service error type
#[derive(Debug)]
pub enum AttributionError {
    InvalidInput(String),
    Store(StoreError),
}

impl From<StoreError> for AttributionError {
    fn from(err: StoreError) -> Self {
        AttributionError::Store(err)
    }
}

/// Builds the attribution a completing stage earns for its owner, or `None`
/// when the stage has no owning agent.
pub fn for_stage(stage: &Stage) -> Option<Attribution> {
    let agent_id = stage.agent_id.clone()?;
    let agent_name = stage
        .agent_name
        .clone()
        .unwrap_or_else(|| agent_id.clone());
    Some(Attribution::new(
        stage.pipeline_id,
        stage.id,
        stage.name,
        agent_id,
        agent_name,
    ))
}

/// Records an attribution with the registry weight for `stage_name`.
/// Idempotent: a second record for the same `(pipeline_id, stage_name)` is
/// a no-op.
pub async fn record(
    store: &dyn Store,
    pipeline_id: Uuid,
    stage_id: Uuid,
    stage_name: StageName,
    agent_id: String,
    agent_name: String,
) -> Result<Attribution, AttributionError> {
    if agent_id.trim().is_empty() {
        return Err(AttributionError::InvalidInput(
            "agent_id cannot be empty".to_string(),
        ));
    }

    let attribution = Attribution::new(pipeline_id, stage_id, stage_name, agent_id, agent_name);
    let inserted = store.append_attribution(&attribution).await?;
    if inserted {
        tracing::info!(
            "Attribution recorded: {} earns {}% for {} of pipeline {}",
            attribution.agent_id,
            attribution.percentage,
            stage_name,
            pipeline_id
        );
    } else {
        tracing::debug!(
            "Attribution for {} of pipeline {} already recorded",
            stage_name,
            pipeline_id
        );
    }

    Ok(attribution)
}

/// Distributes `total` across agents by stage weight.
///
/// Each credit earns `total * weight / 100`, floored; per-agent shares are
/// summed. When the credits cover every stage in the registry (weights sum
/// to 100) the floor residue is handed to the agent credited with the
/// earliest stage, so the shares always sum to exactly `total`.
pub fn distribute(total: u128, credits: &[StageCredit]) -> HashMap<String, u128> {
    let mut shares: HashMap<String, u128> = HashMap::new();
    let mut distributed: u128 = 0;

    for credit in credits {
        let share = total * credit.stage_name.weight() as u128 / 100;
        distributed += share;
        *shares.entry(credit.agent_id.clone()).or_insert(0) += share;
    }

    let weight_sum: u32 = credits.iter().map(|c| c.stage_name.weight()).sum();
    if weight_sum == 100 {
        let residual = total.saturating_sub(distributed);
        if residual > 0 {
            let earliest = credits
                .iter()
                .min_by_key(|c| c.stage_name.order_index())
                .expect("credits are non-empty when weights sum to 100");
            *shares.entry(earliest.agent_id.clone()).or_insert(0) += residual;
        }
    }

    shares
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use showrun_core::domain::pipeline::Pipeline;

    fn full_credits(agent_id: &str) -> Vec<StageCredit> {
        StageName::all()
            .iter()
            .map(|name| StageCredit {
                stage_name: *name,
                agent_id: agent_id.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_single_agent_gets_whole_total() {
        // 10^24 exercises totals far beyond u64.
        let total = 10u128.pow(24);
        let shares = distribute(total, &full_credits("x"));
        assert_eq!(shares.len(), 1);
        assert_eq!(shares.get("x"), Some(&total));
    }

    #[test]
    fn test_split_follows_stage_weights() {
        let mut credits = full_credits("a1");
        for credit in &mut credits {
            if matches!(
                credit.stage_name,
                StageName::Music | StageName::Visual | StageName::Publish
            ) {
                credit.agent_id = "a2".to_string();
            }
        }

        let shares = distribute(1_000_000, &credits);
        assert_eq!(shares.get("a1"), Some(&700_000));
        assert_eq!(shares.get("a2"), Some(&300_000));
    }

    #[test]
    fn test_conservation_for_awkward_totals() {
        for total in [0u128, 1, 7, 99, 100, 101, 12_345, 999_999_937] {
            let shares = distribute(total, &full_credits("x"));
            let sum: u128 = shares.values().sum();
            assert_eq!(sum, total, "lost value distributing {}", total);
        }
    }

    #[test]
    fn test_floor_residue_goes_to_earliest_stage_agent() {
        // One distinct agent per stage; total 7 floors every share down.
        let credits: Vec<StageCredit> = StageName::all()
            .iter()
            .map(|name| StageCredit {
                stage_name: *name,
                agent_id: name.as_str().to_lowercase(),
            })
            .collect();

        let shares = distribute(7, &credits);
        let sum: u128 = shares.values().sum();
        assert_eq!(sum, 7);
        // floor(7 * 10 / 100) = 0 for RESEARCH plus the residue of 3.
        assert_eq!(shares.get("research"), Some(&3));
        assert_eq!(shares.get("script"), Some(&1));
    }

    #[test]
    fn test_partial_credits_take_no_residue() {
        let credits = vec![StageCredit {
            stage_name: StageName::Script,
            agent_id: "a1".to_string(),
        }];
        let shares = distribute(10, &credits);
        assert_eq!(shares.get("a1"), Some(&2));
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let store = MemStore::new();
        let pipeline = Pipeline::draft("topic".to_string(), None);
        let stage = Stage::pending(pipeline.id, StageName::Voice);
        store
            .create_pipeline_with_stages(&pipeline, std::slice::from_ref(&stage))
            .await
            .unwrap();

        record(
            &store,
            pipeline.id,
            stage.id,
            StageName::Voice,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await
        .unwrap();
        record(
            &store,
            pipeline.id,
            stage.id,
            StageName::Voice,
            "a1".to_string(),
            "Agent One".to_string(),
        )
        .await
        .unwrap();

        let stored = store.list_attributions(pipeline.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].percentage, 20);
    }

    #[tokio::test]
    async fn test_record_rejects_empty_agent() {
        let store = MemStore::new();
        let result = record(
            &store,
            Uuid::new_v4(),
            Uuid::new_v4(),
            StageName::Voice,
            "  ".to_string(),
            "Agent".to_string(),
        )
        .await;
        assert!(matches!(result, Err(AttributionError::InvalidInput(_))));
    }
}
