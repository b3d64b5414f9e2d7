use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::{Envelope, Node, NodeStatus, NodeView};
use serde::Deserialize;

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub agent_port: u16,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
    #[serde(default)]
    pub ssh_user: String,
    /// Plaintext; encrypted on write, never returned.
    #[serde(default)]
    pub ssh_password: Option<String>,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub data_path: String,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

fn default_ssh_port() -> u16 {
    22
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    Json(req): Json<NodeRequest>,
) -> Result<Json<serde_json::Value>> {
    match op.as_str() {
        "add" => {
            let enc = encrypt_password(&state, req.ssh_password.as_deref())?;
            let now = panel_common::models::timestamp();
            let node = state
                .nodes
                .create(Node {
                    id: 0,
                    name: req.name,
                    address: req.address,
                    agent_port: req.agent_port,
                    ssh_port: req.ssh_port,
                    ssh_user: req.ssh_user,
                    ssh_password_enc: enc,
                    is_local: req.is_local,
                    status: NodeStatus::Offline,
                    data_path: req.data_path,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            ok(NodeView::from(&node))
        }
        "get" => {
            let node = state.nodes.get(req.id).await?;
            ok(NodeView::from(&node))
        }
        "update" => {
            let mut existing = state.nodes.get(req.id).await?;
            existing.name = req.name;
            existing.address = req.address;
            existing.agent_port = req.agent_port;
            existing.ssh_port = req.ssh_port;
            existing.ssh_user = req.ssh_user;
            if let Some(ref password) = req.ssh_password {
                existing.ssh_password_enc = encrypt_password(&state, Some(password))?;
            }
            existing.data_path = req.data_path;
            let updated = state.nodes.update(existing).await?;
            state.node_manager.remove(updated.id).await?;
            ok(NodeView::from(&updated))
        }
        "delete" => {
            state.nodes.delete(req.id).await?;
            state.node_manager.remove(req.id).await?;
            ok(serde_json::Value::Null)
        }
        "list" => {
            let nodes = state.nodes.list().await?;
            let views: Vec<NodeView> = nodes.iter().map(NodeView::from).collect();
            ok(views)
        }
        "page" => {
            let nodes = state.nodes.list().await?;
            let page = req.page.max(1);
            let size = req.page_size.max(1) as usize;
            let start = (page as usize - 1) * size;
            let items: Vec<NodeView> = nodes.iter().skip(start).take(size).map(NodeView::from).collect();
            ok(serde_json::json!({ "total": nodes.len(), "items": items }))
        }
        _ => Err(Error::from_kind(ErrorKind::BadRequest)),
    }
}

fn encrypt_password(state: &AppState, password: Option<&str>) -> Result<Vec<u8>> {
    match password {
        Some(p) if !p.is_empty() => {
            let encryptor = panel_core::crypto::Encryptor::new(state.config.encryption_key_bytes());
            encryptor.encrypt(p)
        }
        _ => Ok(vec![]),
    }
}

fn ok<T: serde::Serialize>(data: T) -> Result<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(Envelope::ok(data)).unwrap()))
}
