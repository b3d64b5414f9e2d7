use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_common::error::Result;
use panel_common::models::Env;
use panel_common::repo::EnvRepository;
use sqlx::{FromRow, SqlitePool};

#[derive(FromRow)]
struct EnvRow {
    id: i64,
    key: String,
    value: String,
    scope: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<EnvRow> for Env {
    fn from(r: EnvRow) -> Self {
        Env {
            id: r.id,
            key: r.key,
            value: r.value,
            scope: r.scope,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

pub struct SqliteEnvRepository {
    pool: SqlitePool,
}

impl SqliteEnvRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnvRepository for SqliteEnvRepository {
    async fn get_by_key(&self, key: &str) -> Result<Option<Env>> {
        let row = sqlx::query_as::<_, EnvRow>("SELECT * FROM env WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<Env>> {
        let rows = sqlx::query_as::<_, EnvRow>("SELECT * FROM env ORDER BY id").fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert(&self, env: Env) -> Result<Env> {
        let now = panel_common::models::timestamp();
        sqlx::query(
            r#"INSERT INTO env (key, value, scope, created_at, updated_at) VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, scope = excluded.scope, updated_at = excluded.updated_at"#,
        )
        .bind(&env.key)
        .bind(&env.value)
        .bind(&env.scope)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(self.get_by_key(&env.key).await?.expect("just upserted"))
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM env WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
