use deadpool_postgres::PoolError;
use thiserror::Error;
use tokio_postgres::Error as PgError;
use tracing::{info, instrument};

use super::PgPool;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to get postgres connection: {0}")]
    Pool(#[from] PoolError),
    #[error("failed to run migration: {0}")]
    Postgres(#[from] PgError),
}

struct Migration {
    id: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        description: "posts table",
        sql: r#"
CREATE TABLE IF NOT EXISTS lf.posts (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    post_type TEXT NOT NULL CHECK (post_type IN ('LOST', 'FOUND')),
    category TEXT NOT NULL DEFAULT '',
    contact_info TEXT,
    location_lat DOUBLE PRECISION,
    location_lng DOUBLE PRECISION,
    location_name TEXT,
    image_url TEXT,
    embedding REAL[],
    embedding_dim INTEGER,
    owner_id TEXT NOT NULL,
    created_by_name TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    embedded_at TIMESTAMPTZ,
    CONSTRAINT chk_location_pair CHECK ((location_lat IS NULL) = (location_lng IS NULL)),
    CONSTRAINT chk_embedding_dim CHECK (embedding_dim IS NULL OR embedding_dim > 0)
);

CREATE INDEX IF NOT EXISTS idx_posts_created ON lf.posts(created_at, id);
"#,
    },
    Migration {
        id: 2,
        description: "index for posts awaiting an embedding",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_posts_pending_embedding
    ON lf.posts(created_at, id)
    WHERE embedding IS NULL AND image_url IS NOT NULL;
"#,
    },
];

/// Applies every migration not yet recorded in `lf.schema_migrations`,
/// each inside its own transaction.
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrationError> {
    let mut client = pool.get().await?;
    client
        .batch_execute(
            "CREATE SCHEMA IF NOT EXISTS lf;
             CREATE TABLE IF NOT EXISTS lf.schema_migrations (
                id INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             );",
        )
        .await?;

    for migration in MIGRATIONS {
        let already_applied: bool = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM lf.schema_migrations WHERE id = $1)",
                &[&migration.id],
            )
            .await?
            .get(0);

        if already_applied {
            continue;
        }

        let tx = client.transaction().await?;
        tx.batch_execute(migration.sql).await?;
        tx.execute(
            "INSERT INTO lf.schema_migrations (id, description) VALUES ($1, $2)",
            &[&migration.id, &migration.description],
        )
        .await?;
        tx.commit().await?;

        info!(
            id = migration.id,
            description = migration.description,
            "applied migration"
        );
    }

    Ok(())
}
