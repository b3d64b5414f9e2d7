use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_common::error::Result;
use panel_common::models::Kv;
use panel_common::repo::KvRepository;
use sqlx::{FromRow, SqlitePool};

#[derive(FromRow)]
struct KvRow {
    id: i64,
    key: String,
    value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<KvRow> for Kv {
    fn from(r: KvRow) -> Self {
        Kv {
            id: r.id,
            key: r.key,
            value: r.value,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

pub struct SqliteKvRepository {
    pool: SqlitePool,
}

impl SqliteKvRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvRepository for SqliteKvRepository {
    async fn get(&self, key: &str) -> Result<Option<Kv>> {
        let row = sqlx::query_as::<_, KvRow>("SELECT * FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn set(&self, key: &str, value: &str) -> Result<Kv> {
        let now = panel_common::models::timestamp();
        sqlx::query(
            r#"INSERT INTO kv (key, value, created_at, updated_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(self.get(key).await?.expect("just set"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?").bind(key).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_is_idempotent_upsert() {
        let pool = crate::persistence::connect(":memory:").await.unwrap();
        let repo = SqliteKvRepository::new(pool);

        let first = repo.set("last_deploy_id", "1").await.unwrap();
        let second = repo.set("last_deploy_id", "2").await.unwrap();
        assert_eq!(first.id, second.id, "upsert must reuse the row, not duplicate it");
        assert_eq!(second.value, "2");

        repo.delete("last_deploy_id").await.unwrap();
        assert!(repo.get("last_deploy_id").await.unwrap().is_none());
    }
}
