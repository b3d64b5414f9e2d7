use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use futures::StreamExt as _;
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::{Envelope, Service, ServiceStatus};
use panel_core::exec::NodeExec;
use panel_core::pipeline::{DeployCtx, Pipeline, ProgressEvent};
use panel_core::template::TemplateFuncs;
use serde::Deserialize;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub app_id: i64,
    #[serde(default)]
    pub node_id: i64,
    #[serde(default)]
    pub qa_values: serde_json::Value,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<serde_json::Value>> {
    match op.as_str() {
        "page" => {
            let services = state.services.list().await?;
            let page = req.page.max(1);
            let size = req.page_size.max(1) as usize;
            let start = (page as usize - 1) * size;
            let items: Vec<Service> = services.into_iter().skip(start).take(size).collect();
            ok(serde_json::json!({ "total": items.len(), "items": items }))
        }
        "save" => {
            let now = panel_common::models::timestamp();
            let service = if req.id == 0 {
                Service {
                    id: 0,
                    name: req.name,
                    app_id: req.app_id,
                    node_id: req.node_id,
                    status: ServiceStatus::Pending,
                    qa_values: req.qa_values,
                    deploy_info: None,
                    created_at: now,
                    updated_at: now,
                }
            } else {
                let mut existing = state.services.get(req.id).await?;
                existing.name = req.name;
                existing.app_id = req.app_id;
                existing.node_id = req.node_id;
                existing.qa_values = req.qa_values;
                existing.updated_at = now;
                existing
            };
            ok(state.services.save(service).await?)
        }
        "delete" => {
            let service = state.services.get(req.id).await?;
            if service.is_deployed() && !req.force {
                return Err(Error::from_kind(ErrorKind::Conflict));
            }
            state.services.delete(req.id).await?;
            ok(serde_json::Value::Null)
        }
        _ => Err(Error::from_kind(ErrorKind::BadRequest)),
    }
}

pub async fn deploy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ServiceRequest>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, std::convert::Infallible>>>> {
    let service = state.services.get(req.id).await?;
    if service.is_deployed() {
        return Err(Error::from_kind(ErrorKind::Conflict));
    }
    let app = state.apps.get(req.app_id).await?;
    let node_state = state.node_manager.get(req.node_id).await?;
    let node = node_state.node.clone();
    let node_exec: Arc<NodeExec> = node_state.exec().await?;

    let qa_values = panel_core::pipeline::parse_qa_values(&req.qa_values);
    let env = panel_core::pipeline::merge_env(&app, &node, &qa_values);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let writer = panel_core::pipeline::ProgressWriter::new(tx);
    let funcs = TemplateFuncs {
        is_agent: node.is_local,
        master_host: state.config.master_host.clone(),
        master_port: state.config.master_port,
    };

    let ctx = DeployCtx {
        app,
        service: service.clone(),
        node,
        node_exec,
        node_manager: state.node_manager.clone(),
        qa_values,
        env,
        envs: state.env.clone(),
        funcs,
        writer,
        service_path: String::new(),
        rendered_compose: None,
        deploy_info: BTreeMap::new(),
    };

    let services = state.services.clone();
    tokio::spawn(async move {
        let outcome = Pipeline::up().run(ctx).await;
        match outcome {
            Ok(ctx) => {
                let mut updated = service;
                updated.status = ServiceStatus::Running;
                updated.deploy_info = Some(serde_json::to_value(&ctx.deploy_info).unwrap_or_default());
                updated.updated_at = panel_common::models::timestamp();
                let _ = services.save(updated).await;
            }
            Err(e) => {
                tracing::warn!(service = %service.name, error = %e, "deploy pipeline failed");
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let (event_name, data) = match &event {
            ProgressEvent::Info(msg) => ("info", msg.clone()),
            ProgressEvent::Warning(msg) => ("warning", msg.clone()),
            ProgressEvent::Error(msg) => ("error", msg.clone()),
            ProgressEvent::Done => ("done", String::new()),
        };
        Ok(Event::default().event(event_name).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn undeploy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ServiceRequest>,
) -> Result<Json<serde_json::Value>> {
    let service = state.services.get(req.id).await?;
    if !service.is_deployed() {
        return ok(serde_json::Value::Null);
    }
    let app = state.apps.get(service.app_id).await?;
    let node_state = state.node_manager.get(service.node_id).await?;
    let node = node_state.node.clone();
    let node_exec = node_state.exec().await?;

    let qa_values = panel_core::pipeline::parse_qa_values(&service.qa_values);
    let env = panel_core::pipeline::merge_env(&app, &node, &qa_values);

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let writer = panel_core::pipeline::ProgressWriter::new(tx);
    let funcs = TemplateFuncs {
        is_agent: node.is_local,
        master_host: state.config.master_host.clone(),
        master_port: state.config.master_port,
    };

    let ctx = DeployCtx {
        app,
        service: service.clone(),
        node,
        node_exec,
        node_manager: state.node_manager.clone(),
        qa_values,
        env,
        envs: state.env.clone(),
        funcs,
        writer,
        service_path: String::new(),
        rendered_compose: None,
        deploy_info: BTreeMap::new(),
    };

    Pipeline::down().run(ctx).await?;

    let mut updated = service;
    updated.status = ServiceStatus::Stopped;
    updated.deploy_info = None;
    updated.updated_at = panel_common::models::timestamp();
    ok(state.services.save(updated).await?)
}

fn ok<T: serde::Serialize>(data: T) -> Result<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(Envelope::ok(data)).unwrap()))
}
