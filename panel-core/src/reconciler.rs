use std::sync::Arc;
use std::time::Duration;

use bollard::container::ListContainersOptions;
use panel_common::error::Result;
use panel_common::models::ServiceStatus;
use panel_common::repo::ServiceRepository;

use crate::state::NodeManager;

const TICK: Duration = Duration::from_secs(25);

/// Periodically syncs persisted service status against the container
/// state actually observed on each service's node, keyed on the
/// `owner`/`managed-by`/`service` label triple written by the up
/// pipeline's `DockerComposeFileParse` stage.
pub struct ServiceStateReconciler {
    services: Arc<dyn ServiceRepository>,
    nodes: Arc<NodeManager>,
}

impl ServiceStateReconciler {
    pub fn new(services: Arc<dyn ServiceRepository>, nodes: Arc<NodeManager>) -> Self {
        Self { services, nodes }
    }

    pub async fn run(self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "service state reconciliation tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("service state reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<()> {
        for service in self.services.list().await? {
            let Ok(state) = self.nodes.get(service.node_id).await else {
                continue;
            };
            let Ok(docker) = state.runtime().await else {
                continue;
            };

            let project_id = service.app_id.to_string();
            let mut filters = std::collections::HashMap::new();
            filters.insert(
                "label".to_string(),
                vec![
                    format!("owner={project_id}"),
                    format!("managed-by={project_id}"),
                    format!("service={}", service.name),
                ],
            );
            let containers = docker
                .list_containers(Some(ListContainersOptions {
                    all: true,
                    filters,
                    ..Default::default()
                }))
                .await;

            let Ok(containers) = containers else { continue };
            let running = !containers.is_empty()
                && containers
                    .iter()
                    .all(|c| c.state.as_deref() == Some("running"));
            let new_status = if running { ServiceStatus::Running } else { ServiceStatus::Stopped };

            if service.status != new_status {
                let mut updated = service.clone();
                updated.status = new_status;
                updated.updated_at = panel_common::models::timestamp();
                let _ = self.services.save(updated).await;
            }
        }
        Ok(())
    }
}
