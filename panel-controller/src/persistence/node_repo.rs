use async_trait::async_trait;
use chrono::{DateTime, Utc};
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::{Node, NodeStatus};
use panel_common::repo::NodeRepository;
use sqlx::{FromRow, SqlitePool};

#[derive(FromRow)]
struct NodeRow {
    id: i64,
    name: String,
    address: String,
    agent_port: i64,
    ssh_port: i64,
    ssh_user: String,
    ssh_password_enc: Vec<u8>,
    is_local: bool,
    status: String,
    data_path: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<NodeRow> for Node {
    fn from(r: NodeRow) -> Self {
        Node {
            id: r.id,
            name: r.name,
            address: r.address,
            agent_port: r.agent_port as u16,
            ssh_port: r.ssh_port as u16,
            ssh_user: r.ssh_user,
            ssh_password_enc: r.ssh_password_enc,
            is_local: r.is_local,
            status: if r.status == "online" { NodeStatus::Online } else { NodeStatus::Offline },
            data_path: r.data_path,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

pub struct SqliteNodeRepository {
    pool: SqlitePool,
}

impl SqliteNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeRepository for SqliteNodeRepository {
    async fn get(&self, id: i64) -> Result<Node> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        Ok(row.into())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Node>> {
        let row = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self) -> Result<Vec<Node>> {
        let rows = sqlx::query_as::<_, NodeRow>("SELECT * FROM nodes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create(&self, node: Node) -> Result<Node> {
        let now = panel_common::models::timestamp();
        let id = sqlx::query(
            r#"INSERT INTO nodes
               (name, address, agent_port, ssh_port, ssh_user, ssh_password_enc, is_local, status, data_path, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&node.name)
        .bind(&node.address)
        .bind(node.agent_port as i64)
        .bind(node.ssh_port as i64)
        .bind(&node.ssh_user)
        .bind(&node.ssh_password_enc)
        .bind(node.is_local)
        .bind(node.status.as_str())
        .bind(&node.data_path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        self.get(id).await
    }

    async fn update(&self, node: Node) -> Result<Node> {
        let now = panel_common::models::timestamp();
        sqlx::query(
            r#"UPDATE nodes SET name = ?, address = ?, agent_port = ?, ssh_port = ?, ssh_user = ?,
               ssh_password_enc = ?, data_path = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(&node.name)
        .bind(&node.address)
        .bind(node.agent_port as i64)
        .bind(node.ssh_port as i64)
        .bind(&node.ssh_user)
        .bind(&node.ssh_password_enc)
        .bind(&node.data_path)
        .bind(now)
        .bind(node.id)
        .execute(&self.pool)
        .await?;
        self.get(node.id).await
    }

    /// Only writes when address, agent_port, data_path, or status actually
    /// differ, to avoid bumping `updated_at` on a no-op heartbeat.
    async fn update_heartbeat(
        &self,
        name: &str,
        address: &str,
        agent_port: u16,
        data_path: &str,
        status: NodeStatus,
    ) -> Result<Node> {
        let Some(existing) = self.get_by_name(name).await? else {
            return self
                .create(Node {
                    id: 0,
                    name: name.to_string(),
                    address: address.to_string(),
                    agent_port,
                    ssh_port: 22,
                    ssh_user: String::new(),
                    ssh_password_enc: vec![],
                    is_local: false,
                    status,
                    data_path: data_path.to_string(),
                    created_at: panel_common::models::timestamp(),
                    updated_at: panel_common::models::timestamp(),
                })
                .await;
        };

        if !existing.heartbeat_differs(address, agent_port, data_path, &status) {
            return Ok(existing);
        }

        let now = panel_common::models::timestamp();
        sqlx::query("UPDATE nodes SET address = ?, agent_port = ?, data_path = ?, status = ?, updated_at = ? WHERE id = ?")
            .bind(address)
            .bind(agent_port as i64)
            .bind(data_path)
            .bind(status.as_str())
            .bind(now)
            .bind(existing.id)
            .execute(&self.pool)
            .await?;
        self.get(existing.id).await
    }

    async fn set_status(&self, id: i64, status: NodeStatus) -> Result<()> {
        let now = panel_common::models::timestamp();
        sqlx::query("UPDATE nodes SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM nodes WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn repo() -> SqliteNodeRepository {
        let pool = crate::persistence::connect(":memory:").await.unwrap();
        SqliteNodeRepository::new(pool)
    }

    fn node(name: &str) -> Node {
        Node {
            id: 0,
            name: name.to_string(),
            address: "10.0.0.1".to_string(),
            agent_port: 8081,
            ssh_port: 22,
            ssh_user: "root".to_string(),
            ssh_password_enc: vec![],
            is_local: false,
            status: NodeStatus::Online,
            data_path: "/data".to_string(),
            created_at: panel_common::models::timestamp(),
            updated_at: panel_common::models::timestamp(),
        }
    }

    #[tokio::test]
    async fn heartbeat_creates_then_noop_does_not_bump_updated_at() {
        let repo = repo().await;
        let created = repo.create(node("n1")).await.unwrap();

        let unchanged = repo
            .update_heartbeat("n1", &created.address, created.agent_port, &created.data_path, NodeStatus::Online)
            .await
            .unwrap();
        assert_eq!(unchanged.updated_at, created.updated_at, "no-op heartbeat must not bump updated_at");

        let changed = repo
            .update_heartbeat("n1", "10.0.0.2", created.agent_port, &created.data_path, NodeStatus::Online)
            .await
            .unwrap();
        assert_eq!(changed.address, "10.0.0.2");
    }

    #[tokio::test]
    async fn name_is_unique() {
        let repo = repo().await;
        repo.create(node("dup")).await.unwrap();
        let second = repo.create(node("dup")).await;
        assert!(second.is_err());
    }
}
