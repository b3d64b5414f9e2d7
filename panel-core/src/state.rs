use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bollard::Docker;
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::Node;
use panel_common::repo::NodeRepository;
use tokio::sync::RwLock;

use crate::crypto::Encryptor;
use crate::exec::NodeExec;

/// Lazily-derived per-node runtime client and exec channel, rebuilt once
/// on a guarded double-checked path and reused until the owning
/// `NodeManager` evicts it.
pub struct NodeState {
    pub node: Node,
    exec: RwLock<Option<Arc<NodeExec>>>,
    runtime: RwLock<Option<Arc<Docker>>>,
    encryptor: Arc<Encryptor>,
}

impl NodeState {
    fn new(node: Node, encryptor: Arc<Encryptor>) -> Self {
        Self {
            node,
            exec: RwLock::new(None),
            runtime: RwLock::new(None),
            encryptor,
        }
    }

    pub async fn exec(&self) -> Result<Arc<NodeExec>> {
        if let Some(e) = self.exec.read().await.as_ref() {
            return Ok(e.clone());
        }
        let mut guard = self.exec.write().await;
        if let Some(e) = guard.as_ref() {
            return Ok(e.clone());
        }
        let password = if self.node.ssh_password_enc.is_empty() {
            String::new()
        } else {
            self.encryptor.decrypt(&self.node.ssh_password_enc)?
        };
        let exec = Arc::new(NodeExec::for_node(&self.node, password));
        exec.init().await?;
        *guard = Some(exec.clone());
        Ok(exec)
    }

    pub async fn runtime(&self) -> Result<Arc<Docker>> {
        if let Some(d) = self.runtime.read().await.as_ref() {
            return Ok(d.clone());
        }
        let mut guard = self.runtime.write().await;
        if let Some(d) = guard.as_ref() {
            return Ok(d.clone());
        }
        let docker = if self.node.is_local {
            Docker::connect_with_local_defaults()
        } else {
            let url = format!("tcp://{}:{}", self.node.address, self.node.agent_port);
            Docker::connect_with_http(&url, 30, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        let docker = Arc::new(docker);
        *guard = Some(docker.clone());
        Ok(docker)
    }

    /// Decrypted SSH password, for callers (session PTYs) that need a raw
    /// credential rather than a `NodeExec` handle.
    pub fn decrypt_ssh_password(&self) -> Result<String> {
        if self.node.ssh_password_enc.is_empty() {
            Ok(String::new())
        } else {
            self.encryptor.decrypt(&self.node.ssh_password_enc)
        }
    }

    pub async fn invalidate(&self) -> Result<()> {
        if let Some(e) = self.exec.write().await.take() {
            e.close().await?;
        }
        self.runtime.write().await.take();
        Ok(())
    }
}

/// Owns the `node_id -> NodeState` cache behind a guarded, double-checked
/// read/write lock: the same pattern `NodeState` itself uses for its two
/// lazily-built facilities.
pub struct NodeManager {
    nodes: RwLock<HashMap<i64, Arc<NodeState>>>,
    repo: Arc<dyn NodeRepository>,
    encryptor: Arc<Encryptor>,
    health_timeout: Duration,
}

impl NodeManager {
    pub fn new(repo: Arc<dyn NodeRepository>, encryptor: Arc<Encryptor>) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            repo,
            encryptor,
            health_timeout: Duration::from_secs(5),
        }
    }

    pub fn health_timeout(&self) -> Duration {
        self.health_timeout
    }

    pub async fn get(&self, node_id: i64) -> Result<Arc<NodeState>> {
        if let Some(state) = self.nodes.read().await.get(&node_id) {
            return Ok(state.clone());
        }
        let mut guard = self.nodes.write().await;
        if let Some(state) = guard.get(&node_id) {
            return Ok(state.clone());
        }
        let node = self.repo.get(node_id).await?;
        let state = Arc::new(NodeState::new(node, self.encryptor.clone()));
        guard.insert(node_id, state.clone());
        Ok(state)
    }

    pub async fn add_or_get(&self, node: Node) -> Arc<NodeState> {
        let mut guard = self.nodes.write().await;
        guard
            .entry(node.id)
            .or_insert_with(|| Arc::new(NodeState::new(node, self.encryptor.clone())))
            .clone()
    }

    /// Evicts and closes a node's cached state; the next `get` reconstructs
    /// it from the repository. Called after any mutation that could affect
    /// connectivity (address, credentials, port).
    pub async fn remove(&self, node_id: i64) -> Result<()> {
        let removed = self.nodes.write().await.remove(&node_id);
        if let Some(state) = removed {
            state.invalidate().await?;
        }
        Ok(())
    }

    pub async fn node_ids(&self) -> Vec<i64> {
        self.nodes.read().await.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use panel_common::models::NodeStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRepo {
        hits: AtomicUsize,
    }

    #[async_trait]
    impl NodeRepository for CountingRepo {
        async fn get(&self, id: i64) -> Result<Node> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(test_node(id))
        }
        async fn get_by_name(&self, _name: &str) -> Result<Option<Node>> {
            Ok(None)
        }
        async fn list(&self) -> Result<Vec<Node>> {
            Ok(vec![])
        }
        async fn create(&self, node: Node) -> Result<Node> {
            Ok(node)
        }
        async fn update(&self, node: Node) -> Result<Node> {
            Ok(node)
        }
        async fn update_heartbeat(
            &self,
            _name: &str,
            _address: &str,
            _agent_port: u16,
            _data_path: &str,
            _status: NodeStatus,
        ) -> Result<Node> {
            Ok(test_node(1))
        }
        async fn set_status(&self, _id: i64, _status: NodeStatus) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _id: i64) -> Result<()> {
            Ok(())
        }
    }

    fn test_node(id: i64) -> Node {
        Node {
            id,
            name: format!("node-{id}"),
            address: "127.0.0.1".into(),
            agent_port: 8081,
            ssh_port: 22,
            ssh_user: "root".into(),
            ssh_password_enc: vec![],
            is_local: true,
            status: NodeStatus::Online,
            data_path: "/tmp".into(),
            created_at: panel_common::models::timestamp(),
            updated_at: panel_common::models::timestamp(),
        }
    }

    #[tokio::test]
    async fn get_then_remove_triggers_exactly_one_reconstruction() {
        let repo = Arc::new(CountingRepo {
            hits: AtomicUsize::new(0),
        });
        let mgr = NodeManager::new(repo.clone(), Arc::new(Encryptor::new([1u8; 32])));

        mgr.get(1).await.unwrap();
        mgr.get(1).await.unwrap();
        assert_eq!(repo.hits.load(Ordering::SeqCst), 1, "second get must hit the cache");

        mgr.remove(1).await.unwrap();
        mgr.get(1).await.unwrap();
        assert_eq!(repo.hits.load(Ordering::SeqCst), 2, "post-remove get must reconstruct once");
    }
}
