//! Stage dispatch
//!
//! Drives a single claimed stage through the stage contract: assemble the
//! execution context, validate the input, execute the handler, and report
//! the outcome back to the orchestrator.

use anyhow::{Context as AnyhowContext, Result};
use tracing::{info, warn};

use showrun_client::OrchestratorClient;
use showrun_core::contract::{HandlerRegistry, StageContext};
use showrun_core::domain::stage::Stage;
use showrun_core::dto::pipeline::PipelineDetail;

/// Builds the execution context for a claimed stage. The stage input is the
/// pipeline's intake data; the previous output is the predecessor stage's
/// stored handoff, absent for the first stage.
pub fn build_context(detail: &PipelineDetail, stage: &Stage, dry_run: bool) -> StageContext {
    let input = serde_json::json!({
        "topic": detail.pipeline.topic,
        "description": detail.pipeline.description,
    });

    let previous_output = stage.name.predecessor().and_then(|predecessor| {
        detail
            .stages
            .iter()
            .find(|s| s.name == predecessor)
            .and_then(|s| s.output.clone())
    });

    StageContext {
        pipeline_id: stage.pipeline_id,
        stage_id: stage.id,
        input,
        previous_output,
        dry_run,
    }
}

/// Runs a claimed stage end-to-end and reports completion or failure.
///
/// Any handler-reported failure is forwarded with `fail_stage`, which takes
/// the pipeline to FAILED; recovery is an operator decision.
pub async fn run_claimed_stage(
    client: &OrchestratorClient,
    registry: &HandlerRegistry,
    stage: &Stage,
    dry_run: bool,
) -> Result<()> {
    let Some(handler) = registry.get(stage.name) else {
        let error = format!("no handler registered for stage {}", stage.name);
        client
            .fail_stage(stage.id, &error)
            .await
            .context("Failed to report missing handler")?;
        anyhow::bail!(error);
    };

    let detail = client
        .get_pipeline(stage.pipeline_id)
        .await
        .context("Failed to fetch pipeline for stage context")?;
    let ctx = build_context(&detail, stage, dry_run);

    let validation = handler.validate(&ctx.input);
    if !validation.is_valid() {
        let error = format!("input validation failed: {}", validation.errors().join("; "));
        warn!(
            "Stage {} of pipeline {}: {}",
            stage.name, stage.pipeline_id, error
        );
        client
            .fail_stage(stage.id, &error)
            .await
            .context("Failed to report validation failure")?;
        return Ok(());
    }

    client
        .start_stage(stage.id)
        .await
        .context("Failed to start stage")?;

    let result = handler.execute(ctx).await;

    if result.success {
        let output = result.output.unwrap_or(serde_json::Value::Null);
        client
            .complete_stage(stage.id, output, result.artifacts)
            .await
            .context("Failed to report stage completion")?;
        info!(
            "Stage {} of pipeline {} completed",
            stage.name, stage.pipeline_id
        );
    } else {
        let error = result
            .error
            .unwrap_or_else(|| "handler reported failure".to_string());
        client
            .fail_stage(stage.id, &error)
            .await
            .context("Failed to report stage failure")?;
        warn!(
            "Stage {} of pipeline {} failed: {}",
            stage.name, stage.pipeline_id, error
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use showrun_core::domain::pipeline::Pipeline;
    use showrun_core::domain::stage::StageStatus;
    use showrun_core::registry::StageName;

    fn detail_with_research_output() -> PipelineDetail {
        let pipeline = Pipeline::draft(
            "Why cats purr".to_string(),
            Some("short explainer".to_string()),
        );
        let mut stages: Vec<Stage> = StageName::all()
            .iter()
            .map(|name| Stage::pending(pipeline.id, *name))
            .collect();
        stages[0].status = StageStatus::Complete;
        stages[0].output = Some(json!({ "facts": ["cats purr at 25-150 Hz"] }));
        PipelineDetail { pipeline, stages }
    }

    #[test]
    fn test_context_for_first_stage_has_no_previous_output() {
        let detail = detail_with_research_output();
        let research = &detail.stages[0];

        let ctx = build_context(&detail, research, false);
        assert!(ctx.previous_output.is_none());
        assert_eq!(ctx.input["topic"], "Why cats purr");
        assert_eq!(ctx.input["description"], "short explainer");
    }

    #[test]
    fn test_context_carries_predecessor_output() {
        let detail = detail_with_research_output();
        let script = detail
            .stages
            .iter()
            .find(|s| s.name == StageName::Script)
            .unwrap();

        let ctx = build_context(&detail, script, true);
        assert!(ctx.dry_run);
        assert_eq!(
            ctx.previous_output,
            Some(json!({ "facts": ["cats purr at 25-150 Hz"] }))
        );
    }
}
