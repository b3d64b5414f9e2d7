use std::sync::Arc;
use std::time::Duration;

use panel_common::config::Config;
use panel_common::error::Result;
use panel_common::models::{Node, NodeStatus};
use panel_common::repo::NodeRepository;
use panel_core::exec::ExecOptions;
use panel_core::state::NodeManager;
use serde::Deserialize;

const PROBE_TICK: Duration = Duration::from_secs(30);

/// Body of `POST /registry`, sent by an agent once at start-up then every
/// 30 s. `status` is accepted but the controller derives its own view of
/// liveness from [`HealthLoop`]; it is only used for the initial heartbeat.
#[derive(Debug, Deserialize)]
pub struct RegistryRequest {
    pub name: String,
    pub address: String,
    pub agent_port: u16,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub data_path: String,
}

/// Create-or-update-on-diff handling for an agent heartbeat. The agent's
/// own `is_local` is ignored for an existing row: locality is set once at
/// creation and never flips on re-registration.
pub async fn handle_heartbeat(nodes: &Arc<dyn NodeRepository>, req: RegistryRequest) -> Result<Node> {
    let updated = nodes
        .update_heartbeat(&req.name, &req.address, req.agent_port, &req.data_path, NodeStatus::Online)
        .await?;
    tracing::debug!(node = %req.name, address = %req.address, "heartbeat received");
    Ok(updated)
}

/// Walks non-local nodes every 30 s, probes `GET /healthz` with a 5 s
/// timeout, and persists the observed status. A node that just flipped
/// offline triggers best-effort agent bootstrap.
pub struct HealthLoop {
    nodes_repo: Arc<dyn NodeRepository>,
    node_manager: Arc<NodeManager>,
    config: Arc<Config>,
    http: reqwest::Client,
}

impl HealthLoop {
    pub fn new(nodes_repo: Arc<dyn NodeRepository>, node_manager: Arc<NodeManager>, config: Arc<Config>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(node_manager.health_timeout())
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self {
            nodes_repo,
            node_manager,
            config,
            http,
        }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(PROBE_TICK);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("health loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let nodes = match self.nodes_repo.list().await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "health loop could not list nodes");
                return;
            }
        };

        for node in nodes {
            if node.is_local {
                continue;
            }
            let was_online = node.status == NodeStatus::Online;
            let reachable = self.probe(&node).await;
            let new_status = if reachable { NodeStatus::Online } else { NodeStatus::Offline };

            if let Err(e) = self.nodes_repo.set_status(node.id, new_status.clone()).await {
                tracing::warn!(node = %node.name, error = %e, "failed to persist health status");
                continue;
            }
            if was_online && new_status == NodeStatus::Offline {
                tracing::warn!(node = %node.name, "node went offline, attempting agent bootstrap");
                self.bootstrap(&node).await;
            }
        }
    }

    async fn probe(&self, node: &Node) -> bool {
        let url = format!("http://{}:{}/healthz", node.address, node.agent_port);
        matches!(self.http.get(&url).send().await, Ok(resp) if resp.status().is_success())
    }

    /// Best-effort: pushes the embedded agent binary and install script,
    /// then invokes the installer. Failures are logged and retried
    /// unconditionally on the next offline tick, with no backoff.
    async fn bootstrap(&self, node: &Node) {
        let state = match self.node_manager.get(node.id).await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(node = %node.name, error = %e, "bootstrap: cannot load node state");
                return;
            }
        };
        let exec = match state.exec().await {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(node = %node.name, error = %e, "bootstrap: cannot open exec channel");
                return;
            }
        };

        let install_dir = format!("{}/static/install", node.data_path);
        if let Err(e) = exec.mkdir_p(&install_dir).await {
            tracing::warn!(node = %node.name, error = %e, "bootstrap: mkdir_p failed");
            return;
        }

        let binary_dest = format!("{install_dir}/agent");
        let script_dest = format!("{install_dir}/install.sh");

        for (src, dest) in [
            (&self.config.agent_binary_path, &binary_dest),
            (&self.config.install_script_path, &script_dest),
        ] {
            let mut file = match tokio::fs::File::open(src).await {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(node = %node.name, path = %src, error = %e, "bootstrap: local payload missing");
                    return;
                }
            };
            if let Err(e) = exec.write_file_stream(dest, &mut file).await {
                tracing::warn!(node = %node.name, dest = %dest, error = %e, "bootstrap: file push failed");
                return;
            }
        }

        let chmod = format!("chmod +x {script_dest}");
        if let Err(e) = exec.execute_output(&chmod, &ExecOptions::default()).await {
            tracing::warn!(node = %node.name, error = %e, "bootstrap: chmod failed");
            return;
        }

        let install_cmd = format!(
            "{script_dest} --master-host {} --master-port {} --binary-path {binary_dest} --name {} --address {}",
            self.config.master_host, self.config.master_port, node.name, node.address,
        );
        let log_line = |stream: &str| {
            let node_name = node.name.clone();
            let stream = stream.to_string();
            move |line: &str| tracing::info!(node = %node_name, stream = %stream, "{}", line)
        };
        let on_stdout = log_line("stdout");
        let on_stderr = log_line("stderr");
        if let Err(e) = exec
            .execute_command(&install_cmd, &ExecOptions::default(), &on_stdout, &on_stderr)
            .await
        {
            tracing::warn!(node = %node.name, error = %e, "bootstrap: install script failed");
        }
    }
}
