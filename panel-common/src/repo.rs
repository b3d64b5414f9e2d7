use async_trait::async_trait;

use crate::error::Result;
use crate::models::{App, Env, Kv, Node, NodeStatus, Service};

/// Persistence seam: the core depends only on these traits, never on
/// `sqlx` directly. Implementations live in `panel-controller::persistence`.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Node>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Node>>;
    async fn list(&self) -> Result<Vec<Node>>;
    async fn create(&self, node: Node) -> Result<Node>;
    async fn update(&self, node: Node) -> Result<Node>;
    async fn update_heartbeat(
        &self,
        name: &str,
        address: &str,
        agent_port: u16,
        data_path: &str,
        status: NodeStatus,
    ) -> Result<Node>;
    async fn set_status(&self, id: i64, status: NodeStatus) -> Result<()>;
    async fn delete(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<App>;
    async fn list(&self) -> Result<Vec<App>>;
    async fn create(&self, app: App) -> Result<App>;
    async fn update(&self, app: App) -> Result<App>;
    async fn delete(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait ServiceRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Service>;
    async fn list(&self) -> Result<Vec<Service>>;
    async fn save(&self, service: Service) -> Result<Service>;
    async fn delete(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait EnvRepository: Send + Sync {
    async fn get_by_key(&self, key: &str) -> Result<Option<Env>>;
    async fn list(&self) -> Result<Vec<Env>>;
    async fn upsert(&self, env: Env) -> Result<Env>;
    async fn delete(&self, id: i64) -> Result<()>;
}

#[async_trait]
pub trait KvRepository: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Kv>>;
    async fn set(&self, key: &str, value: &str) -> Result<Kv>;
    async fn delete(&self, key: &str) -> Result<()>;
}
