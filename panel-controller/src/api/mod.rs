mod app;
mod docker;
mod node;
mod service;
mod workspace;
mod ws;

use std::sync::Arc;

use axum::routing::{any, get, post};
use axum::Router;
use panel_common::config::Config;
use panel_common::models::Envelope;
use panel_common::repo::{AppRepository, EnvRepository, KvRepository, NodeRepository, ServiceRepository};
use panel_core::state::NodeManager;

use crate::registry;

pub struct AppState {
    pub config: Arc<Config>,
    pub nodes: Arc<dyn NodeRepository>,
    pub apps: Arc<dyn AppRepository>,
    pub services: Arc<dyn ServiceRepository>,
    pub env: Arc<dyn EnvRepository>,
    pub kv: Arc<dyn KvRepository>,
    pub node_manager: Arc<NodeManager>,
    pub session_hub: Arc<panel_core::session::SessionHub>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/registry", post(registry_heartbeat))
        .route("/api/node/:op", post(node::handle))
        .route("/api/application/:op", post(app::handle))
        .route("/api/service/:op", post(service::handle))
        .route("/api/docker/compose/deploy", post(service::deploy))
        .route("/api/docker/compose/undeploy", post(service::undeploy))
        .route("/api/docker/:op", post(docker::handle_collection))
        .route("/api/docker/container/:op", post(docker::handle_container))
        .route("/api/signalr/*rest", any(ws::upgrade))
        .route("/api/workspace/:op", post(workspace::handle))
        .with_state(state)
}

async fn healthz() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"status": "UP"}))
}

async fn registry_heartbeat(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    axum::Json(req): axum::Json<registry::RegistryRequest>,
) -> panel_common::error::Result<axum::Json<Envelope<panel_common::models::NodeView>>> {
    let node = registry::handle_heartbeat(&state.nodes, req).await?;
    Ok(axum::Json(Envelope::ok((&node).into())))
}
