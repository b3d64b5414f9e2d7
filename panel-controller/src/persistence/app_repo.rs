use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::{App, NamedProps, QaItem};
use panel_common::repo::AppRepository;
use sqlx::{FromRow, SqlitePool};

#[derive(FromRow)]
struct AppRow {
    id: i64,
    name: String,
    version: String,
    display: String,
    description: String,
    icon: String,
    docker_compose: Option<String>,
    qa: String,
    metadata: String,
    static_path: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppRow> for App {
    type Error = Error;

    fn try_from(r: AppRow) -> Result<Self> {
        let qa: Vec<QaItem> =
            serde_json::from_str(&r.qa).map_err(|e| Error::custom(ErrorKind::Fatal, format!("corrupt qa column: {e}")))?;
        let metadata: Vec<NamedProps> = serde_json::from_str(&r.metadata)
            .map_err(|e| Error::custom(ErrorKind::Fatal, format!("corrupt metadata column: {e}")))?;
        Ok(App {
            id: r.id,
            name: r.name,
            version: r.version,
            display: r.display,
            description: r.description,
            icon: r.icon,
            docker_compose: r.docker_compose,
            qa,
            metadata,
            static_path: r.static_path,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

pub struct SqliteAppRepository {
    pool: SqlitePool,
}

impl SqliteAppRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AppRepository for SqliteAppRepository {
    async fn get(&self, id: i64) -> Result<App> {
        let row = sqlx::query_as::<_, AppRow>("SELECT * FROM apps WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        row.try_into()
    }

    async fn list(&self) -> Result<Vec<App>> {
        let rows = sqlx::query_as::<_, AppRow>("SELECT * FROM apps ORDER BY id").fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create(&self, app: App) -> Result<App> {
        let now = panel_common::models::timestamp();
        let qa = serde_json::to_string(&app.qa).unwrap();
        let metadata = serde_json::to_string(&app.metadata).unwrap();
        let id = sqlx::query(
            r#"INSERT INTO apps (name, version, display, description, icon, docker_compose, qa, metadata, static_path, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&app.name)
        .bind(&app.version)
        .bind(&app.display)
        .bind(&app.description)
        .bind(&app.icon)
        .bind(&app.docker_compose)
        .bind(qa)
        .bind(metadata)
        .bind(&app.static_path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        self.get(id).await
    }

    async fn update(&self, app: App) -> Result<App> {
        let now = panel_common::models::timestamp();
        let qa = serde_json::to_string(&app.qa).unwrap();
        let metadata = serde_json::to_string(&app.metadata).unwrap();
        sqlx::query(
            r#"UPDATE apps SET name = ?, version = ?, display = ?, description = ?, icon = ?,
               docker_compose = ?, qa = ?, metadata = ?, static_path = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(&app.name)
        .bind(&app.version)
        .bind(&app.display)
        .bind(&app.description)
        .bind(&app.icon)
        .bind(&app.docker_compose)
        .bind(qa)
        .bind(metadata)
        .bind(&app.static_path)
        .bind(now)
        .bind(app.id)
        .execute(&self.pool)
        .await?;
        self.get(app.id).await
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM apps WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
