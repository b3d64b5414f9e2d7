use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn now() -> DateTime<Utc> {
    Utc::now()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeStatus {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "offline")]
    Offline,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }
}

/// A managed host: exactly one agent (or the controller's own self-node)
/// per row. `ssh_password` is stored AES-GCM encrypted and never appears
/// in a [`NodeView`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub agent_port: u16,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub ssh_password_enc: Vec<u8>,
    pub is_local: bool,
    pub status: NodeStatus,
    pub data_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Fields that matter for heartbeat write-amplification control.
    pub fn heartbeat_differs(&self, address: &str, agent_port: u16, data_path: &str, status: &NodeStatus) -> bool {
        self.address != address
            || self.agent_port != agent_port
            || self.data_path != data_path
            || &self.status != status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeView {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub agent_port: u16,
    pub ssh_port: u16,
    pub ssh_user: String,
    pub is_local: bool,
    pub status: NodeStatus,
}

impl From<&Node> for NodeView {
    fn from(n: &Node) -> Self {
        Self {
            id: n.id,
            name: n.name.clone(),
            address: n.address.clone(),
            agent_port: n.agent_port,
            ssh_port: n.ssh_port,
            ssh_user: n.ssh_user.clone(),
            is_local: n.is_local,
            status: n.status.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaItem {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub default: Option<String>,
    pub options: Vec<String>,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedProps {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub display: String,
    pub description: String,
    pub icon: String,
    pub docker_compose: Option<String>,
    pub qa: Vec<QaItem>,
    pub metadata: Vec<NamedProps>,
    pub static_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "stopped")]
    Stopped,
    #[serde(rename = "failed")]
    Failed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub app_id: i64,
    pub node_id: i64,
    pub status: ServiceStatus,
    pub qa_values: serde_json::Value,
    /// Opaque to the core except for the `docker_compose_file_path` key,
    /// written by the DockerComposeUp stage and read back by the down stage.
    pub deploy_info: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Service {
    pub fn is_deployed(&self) -> bool {
        self.deploy_info.is_some()
    }

    pub fn compose_file_path(&self) -> Option<String> {
        self.deploy_info
            .as_ref()?
            .get("docker_compose_file_path")?
            .as_str()
            .map(String::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Env {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kv {
    pub id: i64,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Envelope every HTTP response is wrapped in: `code == 0` on success.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: i32,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 0,
            message: String::new(),
            data,
        }
    }
}

pub fn timestamp() -> DateTime<Utc> {
    now()
}
