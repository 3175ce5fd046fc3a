//! Postgres store
//!
//! `Store` implementation over sqlx. Conditional writes are single UPDATE
//! statements guarded on the expected status; the composite completion runs
//! inside one transaction. Reads retry transient connection errors a bounded
//! number of times before surfacing an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use showrun_core::domain::attribution::Attribution;
use showrun_core::domain::pipeline::{Pipeline, PipelineStatus};
use showrun_core::domain::stage::{Stage, StageStatus};
use showrun_core::dto::pipeline::PipelineDetail;
use showrun_core::registry::StageName;

use super::{PipelineAdvance, StageUpdate, Store, StoreError};

const READ_ATTEMPTS: u32 = 3;

/// Postgres `Store` implementation
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Retries a read a bounded number of times on transient errors.
async fn retry_read<T, Fut, F>(mut op: F) -> Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if attempt < READ_ATTEMPTS && is_transient(&err) => {
                tracing::warn!("Transient store error (attempt {}): {}", attempt, err);
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_pipeline_with_stages(
        &self,
        pipeline: &Pipeline,
        stages: &[Stage],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pipelines (id, topic, description, status, current_stage, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(pipeline.id)
        .bind(&pipeline.topic)
        .bind(&pipeline.description)
        .bind(pipeline.status.as_str())
        .bind(pipeline.current_stage.as_str())
        .bind(pipeline.created_at)
        .bind(pipeline.updated_at)
        .execute(&mut *tx)
        .await?;

        for stage in stages {
            sqlx::query(
                r#"
                INSERT INTO stages (id, pipeline_id, name, status, artifacts, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(stage.id)
            .bind(stage.pipeline_id)
            .bind(stage.name.as_str())
            .bind(stage.status.as_str())
            .bind(&stage.artifacts)
            .bind(stage.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_pipeline(&self, id: Uuid) -> Result<Option<Pipeline>, StoreError> {
        let pool = &self.pool;
        let row = retry_read(|| async move {
            sqlx::query_as::<_, PipelineRow>(
                r#"
                SELECT id, topic, description, status, current_stage, created_at, updated_at
                FROM pipelines
                WHERE id = $1
                "#,
            )
            .bind(id)
            .fetch_optional(pool)
            .await
        })
        .await?;

        row.map(Pipeline::try_from).transpose()
    }

    async fn find_pipeline_stages(&self, pipeline_id: Uuid) -> Result<Vec<Stage>, StoreError> {
        let pool = &self.pool;
        let rows = retry_read(|| async move {
            sqlx::query_as::<_, StageRow>(
                r#"
                SELECT id, pipeline_id, name, status, agent_id, agent_name, output,
                       artifacts, error, claimed_at, started_at, completed_at, created_at
                FROM stages
                WHERE pipeline_id = $1
                "#,
            )
            .bind(pipeline_id)
            .fetch_all(pool)
            .await
        })
        .await?;

        let mut stages = rows
            .into_iter()
            .map(Stage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        stages.sort_by_key(|s| s.name.order_index());
        Ok(stages)
    }

    async fn find_stage(
        &self,
        pipeline_id: Uuid,
        name: StageName,
    ) -> Result<Option<Stage>, StoreError> {
        let pool = &self.pool;
        let name = name.as_str();
        let row = retry_read(|| async move {
            sqlx::query_as::<_, StageRow>(
                r#"
                SELECT id, pipeline_id, name, status, agent_id, agent_name, output,
                       artifacts, error, claimed_at, started_at, completed_at, created_at
                FROM stages
                WHERE pipeline_id = $1 AND name = $2
                "#,
            )
            .bind(pipeline_id)
            .bind(name)
            .fetch_optional(pool)
            .await
        })
        .await?;

        row.map(Stage::try_from).transpose()
    }

    async fn find_stage_by_id(&self, stage_id: Uuid) -> Result<Option<Stage>, StoreError> {
        let pool = &self.pool;
        let row = retry_read(|| async move {
            sqlx::query_as::<_, StageRow>(
                r#"
                SELECT id, pipeline_id, name, status, agent_id, agent_name, output,
                       artifacts, error, claimed_at, started_at, completed_at, created_at
                FROM stages
                WHERE id = $1
                "#,
            )
            .bind(stage_id)
            .fetch_optional(pool)
            .await
        })
        .await?;

        row.map(Stage::try_from).transpose()
    }

    async fn list_pipelines(
        &self,
        status: Option<PipelineStatus>,
        limit: u32,
    ) -> Result<Vec<Pipeline>, StoreError> {
        let pool = &self.pool;
        let rows = retry_read(|| async move {
            match status {
                Some(status) => {
                    sqlx::query_as::<_, PipelineRow>(
                        r#"
                        SELECT id, topic, description, status, current_stage, created_at, updated_at
                        FROM pipelines
                        WHERE status = $1
                        ORDER BY created_at DESC
                        LIMIT $2
                        "#,
                    )
                    .bind(status.as_str())
                    .bind(limit as i64)
                    .fetch_all(pool)
                    .await
                }
                None => {
                    sqlx::query_as::<_, PipelineRow>(
                        r#"
                        SELECT id, topic, description, status, current_stage, created_at, updated_at
                        FROM pipelines
                        ORDER BY created_at DESC
                        LIMIT $1
                        "#,
                    )
                    .bind(limit as i64)
                    .fetch_all(pool)
                    .await
                }
            }
        })
        .await?;

        rows.into_iter().map(Pipeline::try_from).collect()
    }

    async fn list_running_pipelines_with_stages(
        &self,
    ) -> Result<Vec<PipelineDetail>, StoreError> {
        let pool = &self.pool;
        let rows = retry_read(|| async move {
            sqlx::query_as::<_, PipelineRow>(
                r#"
                SELECT id, topic, description, status, current_stage, created_at, updated_at
                FROM pipelines
                WHERE status = $1
                ORDER BY created_at ASC
                "#,
            )
            .bind(PipelineStatus::Running.as_str())
            .fetch_all(pool)
            .await
        })
        .await?;

        let pipelines = rows
            .into_iter()
            .map(Pipeline::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        if pipelines.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = pipelines.iter().map(|p| p.id).collect();
        let stage_rows = retry_read(|| {
            let ids = ids.clone();
            async move {
                sqlx::query_as::<_, StageRow>(
                    r#"
                    SELECT id, pipeline_id, name, status, agent_id, agent_name, output,
                           artifacts, error, claimed_at, started_at, completed_at, created_at
                    FROM stages
                    WHERE pipeline_id = ANY($1)
                    "#,
                )
                .bind(ids)
                .fetch_all(pool)
                .await
            }
        })
        .await?;

        let mut stages = stage_rows
            .into_iter()
            .map(Stage::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        stages.sort_by_key(|s| s.name.order_index());

        Ok(pipelines
            .into_iter()
            .map(|pipeline| {
                let own: Vec<Stage> = stages
                    .iter()
                    .filter(|s| s.pipeline_id == pipeline.id)
                    .cloned()
                    .collect();
                PipelineDetail {
                    pipeline,
                    stages: own,
                }
            })
            .collect())
    }

    async fn compare_and_update_stage(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
    ) -> Result<Option<Stage>, StoreError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();

        let row = sqlx::query_as::<_, StageRow>(
            r#"
            UPDATE stages SET
                status = $1,
                agent_id = COALESCE($2, agent_id),
                agent_name = COALESCE($3, agent_name),
                output = COALESCE($4, output),
                artifacts = COALESCE($5, artifacts),
                error = COALESCE($6, error),
                claimed_at = COALESCE($7, claimed_at),
                started_at = COALESCE($8, started_at),
                completed_at = COALESCE($9, completed_at)
            WHERE id = $10 AND status = ANY($11)
            RETURNING id, pipeline_id, name, status, agent_id, agent_name, output,
                      artifacts, error, claimed_at, started_at, completed_at, created_at
            "#,
        )
        .bind(update.status.as_str())
        .bind(&update.agent_id)
        .bind(&update.agent_name)
        .bind(&update.output)
        .bind(&update.artifacts)
        .bind(&update.error)
        .bind(update.claimed_at)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(stage_id)
        .bind(&expected)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Stage::try_from).transpose()
    }

    async fn update_pipeline(
        &self,
        id: Uuid,
        status: Option<PipelineStatus>,
        current_stage: Option<StageName>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE pipelines SET
                status = COALESCE($2, status),
                current_stage = COALESCE($3, current_stage),
                updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.map(|s| s.as_str()))
        .bind(current_stage.map(|s| s.as_str()))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_attribution(&self, attribution: &Attribution) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO attributions
                (id, pipeline_id, stage_id, stage_name, agent_id, agent_name, percentage, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (pipeline_id, stage_name) DO NOTHING
            "#,
        )
        .bind(attribution.id)
        .bind(attribution.pipeline_id)
        .bind(attribution.stage_id)
        .bind(attribution.stage_name.as_str())
        .bind(&attribution.agent_id)
        .bind(&attribution.agent_name)
        .bind(attribution.percentage as i32)
        .bind(attribution.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_attributions(&self, pipeline_id: Uuid) -> Result<Vec<Attribution>, StoreError> {
        let pool = &self.pool;
        let rows = retry_read(|| async move {
            sqlx::query_as::<_, AttributionRow>(
                r#"
                SELECT id, pipeline_id, stage_id, stage_name, agent_id, agent_name,
                       percentage, created_at
                FROM attributions
                WHERE pipeline_id = $1
                "#,
            )
            .bind(pipeline_id)
            .fetch_all(pool)
            .await
        })
        .await?;

        let mut attributions = rows
            .into_iter()
            .map(Attribution::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        attributions.sort_by_key(|a| a.stage_name.order_index());
        Ok(attributions)
    }

    async fn complete_stage_atomic(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
        attribution: &Attribution,
        advance: PipelineAdvance,
    ) -> Result<Option<Stage>, StoreError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, StageRow>(
            r#"
            UPDATE stages SET
                status = $1,
                output = COALESCE($2, output),
                artifacts = COALESCE($3, artifacts),
                completed_at = COALESCE($4, completed_at)
            WHERE id = $5 AND status = ANY($6)
            RETURNING id, pipeline_id, name, status, agent_id, agent_name, output,
                      artifacts, error, claimed_at, started_at, completed_at, created_at
            "#,
        )
        .bind(update.status.as_str())
        .bind(&update.output)
        .bind(&update.artifacts)
        .bind(update.completed_at)
        .bind(stage_id)
        .bind(&expected)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let stage = Stage::try_from(row)?;

        sqlx::query(
            r#"
            INSERT INTO attributions
                (id, pipeline_id, stage_id, stage_name, agent_id, agent_name, percentage, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (pipeline_id, stage_name) DO NOTHING
            "#,
        )
        .bind(attribution.id)
        .bind(attribution.pipeline_id)
        .bind(attribution.stage_id)
        .bind(attribution.stage_name.as_str())
        .bind(&attribution.agent_id)
        .bind(&attribution.agent_name)
        .bind(attribution.percentage as i32)
        .bind(attribution.created_at)
        .execute(&mut *tx)
        .await?;

        // A pipeline that left RUNNING concurrently keeps its terminal state.
        sqlx::query(
            r#"
            UPDATE pipelines SET
                status = COALESCE($2, status),
                current_stage = COALESCE($3, current_stage),
                updated_at = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(stage.pipeline_id)
        .bind(advance.status.map(|s| s.as_str()))
        .bind(advance.current_stage.map(|s| s.as_str()))
        .bind(Utc::now())
        .bind(PipelineStatus::Running.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(stage))
    }

    async fn fail_stage_atomic(
        &self,
        stage_id: Uuid,
        expected: &[StageStatus],
        update: StageUpdate,
        advance: PipelineAdvance,
    ) -> Result<Option<Stage>, StoreError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, StageRow>(
            r#"
            UPDATE stages SET
                status = $1,
                error = COALESCE($2, error),
                completed_at = COALESCE($3, completed_at)
            WHERE id = $4 AND status = ANY($5)
            RETURNING id, pipeline_id, name, status, agent_id, agent_name, output,
                      artifacts, error, claimed_at, started_at, completed_at, created_at
            "#,
        )
        .bind(update.status.as_str())
        .bind(&update.error)
        .bind(update.completed_at)
        .bind(stage_id)
        .bind(&expected)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let stage = Stage::try_from(row)?;

        sqlx::query(
            r#"
            UPDATE pipelines SET
                status = COALESCE($2, status),
                current_stage = COALESCE($3, current_stage),
                updated_at = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(stage.pipeline_id)
        .bind(advance.status.map(|s| s.as_str()))
        .bind(advance.current_stage.map(|s| s.as_str()))
        .bind(Utc::now())
        .bind(PipelineStatus::Running.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(stage))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: Uuid,
    topic: String,
    description: Option<String>,
    status: String,
    current_stage: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = StoreError;

    fn try_from(row: PipelineRow) -> Result<Self, StoreError> {
        let status = PipelineStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("bad pipeline status: {}", row.status)))?;
        let current_stage = StageName::parse(&row.current_stage).ok_or_else(|| {
            StoreError::Corrupt(format!("bad current_stage: {}", row.current_stage))
        })?;

        Ok(Pipeline {
            id: row.id,
            topic: row.topic,
            description: row.description,
            status,
            current_stage,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StageRow {
    id: Uuid,
    pipeline_id: Uuid,
    name: String,
    status: String,
    agent_id: Option<String>,
    agent_name: Option<String>,
    output: Option<serde_json::Value>,
    artifacts: Vec<String>,
    error: Option<String>,
    claimed_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<StageRow> for Stage {
    type Error = StoreError;

    fn try_from(row: StageRow) -> Result<Self, StoreError> {
        let name = StageName::parse(&row.name)
            .ok_or_else(|| StoreError::Corrupt(format!("bad stage name: {}", row.name)))?;
        let status = StageStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Corrupt(format!("bad stage status: {}", row.status)))?;

        Ok(Stage {
            id: row.id,
            pipeline_id: row.pipeline_id,
            name,
            status,
            agent_id: row.agent_id,
            agent_name: row.agent_name,
            output: row.output,
            artifacts: row.artifacts,
            error: row.error,
            claimed_at: row.claimed_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AttributionRow {
    id: Uuid,
    pipeline_id: Uuid,
    stage_id: Uuid,
    stage_name: String,
    agent_id: String,
    agent_name: String,
    percentage: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<AttributionRow> for Attribution {
    type Error = StoreError;

    fn try_from(row: AttributionRow) -> Result<Self, StoreError> {
        let stage_name = StageName::parse(&row.stage_name)
            .ok_or_else(|| StoreError::Corrupt(format!("bad stage name: {}", row.stage_name)))?;

        Ok(Attribution {
            id: row.id,
            pipeline_id: row.pipeline_id,
            stage_id: row.stage_id,
            stage_name,
            agent_id: row.agent_id,
            agent_name: row.agent_name,
            percentage: row.percentage as u32,
            created_at: row.created_at,
        })
    }
}
