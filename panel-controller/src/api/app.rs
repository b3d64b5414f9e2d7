use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::{App, Envelope, NamedProps, QaItem};
use serde::Deserialize;

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub docker_compose: Option<String>,
    #[serde(default)]
    pub qa: Vec<QaItem>,
    #[serde(default)]
    pub metadata: Vec<NamedProps>,
    #[serde(default)]
    pub static_path: Option<String>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    Json(req): Json<AppRequest>,
) -> Result<Json<serde_json::Value>> {
    match op.as_str() {
        "add" => {
            let now = panel_common::models::timestamp();
            let app = state
                .apps
                .create(App {
                    id: 0,
                    name: req.name,
                    version: req.version,
                    display: req.display,
                    description: req.description,
                    icon: req.icon,
                    docker_compose: req.docker_compose,
                    qa: req.qa,
                    metadata: req.metadata,
                    static_path: req.static_path,
                    created_at: now,
                    updated_at: now,
                })
                .await?;
            ok(app)
        }
        "update" => {
            let mut existing = state.apps.get(req.id).await?;
            existing.name = req.name;
            existing.version = req.version;
            existing.display = req.display;
            existing.description = req.description;
            existing.icon = req.icon;
            existing.docker_compose = req.docker_compose;
            existing.qa = req.qa;
            existing.metadata = req.metadata;
            existing.static_path = req.static_path;
            let updated = state.apps.update(existing).await?;
            ok(updated)
        }
        "delete" => {
            state.apps.delete(req.id).await?;
            ok(serde_json::Value::Null)
        }
        "get" => ok(state.apps.get(req.id).await?),
        "list" => ok(state.apps.list().await?),
        "page" => {
            let apps = state.apps.list().await?;
            let page = req.page.max(1);
            let size = req.page_size.max(1) as usize;
            let start = (page as usize - 1) * size;
            let items: Vec<App> = apps.into_iter().skip(start).take(size).collect();
            ok(serde_json::json!({ "total": items.len(), "items": items }))
        }
        _ => Err(Error::from_kind(ErrorKind::BadRequest)),
    }
}

fn ok<T: serde::Serialize>(data: T) -> Result<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(Envelope::ok(data)).unwrap()))
}
