use sqlx::{postgres::PgPoolOptions, PgPool};

const CREATE_LEADS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS leads (
    phone       TEXT PRIMARY KEY,
    data        JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CREATE_UPDATED_AT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS leads_updated_at_idx ON leads (updated_at DESC)";

pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        ensure_schema(&pool).await?;

        Ok(Self { pool })
    }
}

/// Create the single key-value table if it does not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(CREATE_LEADS_TABLE).execute(pool).await?;
    sqlx::query(CREATE_UPDATED_AT_INDEX).execute(pool).await?;
    tracing::info!("Lead table ready");
    Ok(())
}
