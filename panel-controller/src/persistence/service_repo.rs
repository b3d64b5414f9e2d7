use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::{Service, ServiceStatus};
use panel_common::repo::ServiceRepository;
use sqlx::{FromRow, SqlitePool};

#[derive(FromRow)]
struct ServiceRow {
    id: i64,
    name: String,
    app_id: i64,
    node_id: i64,
    status: String,
    qa_values: String,
    deploy_info: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ServiceRow> for Service {
    type Error = Error;

    fn try_from(r: ServiceRow) -> Result<Self> {
        let status = match r.status.as_str() {
            "running" => ServiceStatus::Running,
            "stopped" => ServiceStatus::Stopped,
            "failed" => ServiceStatus::Failed,
            _ => ServiceStatus::Pending,
        };
        let qa_values = serde_json::from_str(&r.qa_values)
            .map_err(|e| Error::custom(ErrorKind::Fatal, format!("corrupt qa_values column: {e}")))?;
        let deploy_info = r
            .deploy_info
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| Error::custom(ErrorKind::Fatal, format!("corrupt deploy_info column: {e}")))?;
        Ok(Service {
            id: r.id,
            name: r.name,
            app_id: r.app_id,
            node_id: r.node_id,
            status,
            qa_values,
            deploy_info,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

pub struct SqliteServiceRepository {
    pool: SqlitePool,
}

impl SqliteServiceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceRepository for SqliteServiceRepository {
    async fn get(&self, id: i64) -> Result<Service> {
        let row = sqlx::query_as::<_, ServiceRow>("SELECT * FROM services WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        row.try_into()
    }

    async fn list(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, ServiceRow>("SELECT * FROM services ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, service: Service) -> Result<Service> {
        let now = panel_common::models::timestamp();
        let qa_values = serde_json::to_string(&service.qa_values).unwrap();
        let deploy_info = service.deploy_info.as_ref().map(|v| serde_json::to_string(v).unwrap());

        if service.id == 0 {
            let id = sqlx::query(
                r#"INSERT INTO services (name, app_id, node_id, status, qa_values, deploy_info, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&service.name)
            .bind(service.app_id)
            .bind(service.node_id)
            .bind(service.status.as_str())
            .bind(qa_values)
            .bind(deploy_info)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
            self.get(id).await
        } else {
            sqlx::query(
                r#"UPDATE services SET name = ?, app_id = ?, node_id = ?, status = ?, qa_values = ?, deploy_info = ?, updated_at = ?
                   WHERE id = ?"#,
            )
            .bind(&service.name)
            .bind(service.app_id)
            .bind(service.node_id)
            .bind(service.status.as_str())
            .bind(qa_values)
            .bind(deploy_info)
            .bind(now)
            .bind(service.id)
            .execute(&self.pool)
            .await?;
            self.get(service.id).await
        }
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM services WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}
