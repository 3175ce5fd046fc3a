use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            id UUID PRIMARY KEY,
            topic VARCHAR(500) NOT NULL,
            description TEXT,
            status VARCHAR(20) NOT NULL,
            current_stage VARCHAR(20) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create stages table; a pipeline holds at most one slot per stage name
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stages (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            name VARCHAR(20) NOT NULL,
            status VARCHAR(20) NOT NULL,
            agent_id VARCHAR(255),
            agent_name VARCHAR(255),
            output JSONB,
            artifacts TEXT[] NOT NULL DEFAULT '{}',
            error TEXT,
            claimed_at TIMESTAMPTZ,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (pipeline_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create attributions table; one credit per stage per pipeline
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attributions (
            id UUID PRIMARY KEY,
            pipeline_id UUID NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
            stage_id UUID NOT NULL REFERENCES stages(id) ON DELETE CASCADE,
            stage_name VARCHAR(20) NOT NULL,
            agent_id VARCHAR(255) NOT NULL,
            agent_name VARCHAR(255) NOT NULL,
            percentage INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (pipeline_id, stage_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for the hot queries
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_status ON pipelines(status)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipelines_created_at ON pipelines(created_at DESC)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stages_pipeline_id ON stages(pipeline_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stages_status ON stages(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attributions_pipeline_id ON attributions(pipeline_id)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
