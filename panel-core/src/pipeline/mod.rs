mod stages;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use panel_common::error::{Error, Result};
use panel_common::models::{App, Node, Service};
use panel_common::repo::EnvRepository;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use crate::exec::NodeExec;
use crate::template::TemplateFuncs;

pub use stages::{
    CleanupWorkspace, CopyWorkspace, DockerComposeDown, DockerComposeFileParse, DockerComposeUp, DownloadInstaller,
    LoadImage,
};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ProgressEvent {
    Info(String),
    Warning(String),
    Error(String),
    Done,
}

/// Serialises progress writes from whichever stage currently holds the
/// context; ordering within one deployment is total, across deployments
/// unspecified.
#[derive(Clone)]
pub struct ProgressWriter {
    sender: Arc<Mutex<UnboundedSender<ProgressEvent>>>,
}

impl ProgressWriter {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            sender: Arc::new(Mutex::new(sender)),
        }
    }

    pub async fn send(&self, event: ProgressEvent) {
        let _ = self.sender.lock().await.send(event);
    }

    pub async fn info(&self, msg: impl Into<String>) {
        self.send(ProgressEvent::Info(msg.into())).await;
    }

    pub async fn warning(&self, msg: impl Into<String>) {
        self.send(ProgressEvent::Warning(msg.into())).await;
    }
}

/// The mutable bag threaded through every stage of one deployment.
pub struct DeployCtx {
    pub app: App,
    pub service: Service,
    pub node: Node,
    pub node_exec: Arc<NodeExec>,
    pub node_manager: Arc<crate::state::NodeManager>,
    pub qa_values: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    pub envs: Arc<dyn EnvRepository>,
    pub funcs: TemplateFuncs,
    pub writer: ProgressWriter,
    pub service_path: String,
    pub rendered_compose: Option<String>,
    pub deploy_info: BTreeMap<String, String>,
}

impl DeployCtx {
    pub fn service_path(&self) -> &str {
        &self.service_path
    }
}

/// Flattens a `qa_values` JSON object (as received from a deploy request
/// or stored on a `Service`) into a flat string map. Non-string values are
/// rendered via their JSON representation.
pub fn parse_qa_values(value: &serde_json::Value) -> BTreeMap<String, String> {
    match value.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
            .collect(),
        None => BTreeMap::new(),
    }
}

/// Builds the template variable map in the order of precedence the panel
/// documents: `qa_values` from the request, then `App.qa` defaults for any
/// name `qa_values` left unset, then the implicit `APP_NAME`/`APP_VERSION`/
/// `NODE_NAME` triple as the base every deployment gets regardless of app
/// or request content.
pub fn merge_env(app: &App, node: &Node, qa_values: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("APP_NAME".to_string(), app.name.clone());
    env.insert("APP_VERSION".to_string(), app.version.clone());
    env.insert("NODE_NAME".to_string(), node.name.clone());

    for item in &app.qa {
        if let Some(default) = &item.default {
            env.insert(item.name.clone(), default.clone());
        }
    }

    for (key, value) in qa_values {
        env.insert(key.clone(), value.clone());
    }
    env
}

/// One step of a deployment. `cancel` is invoked, in LIFO order, for
/// every stage that already ran `process` successfully once any later
/// stage fails.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    async fn process(&self, ctx: DeployCtx) -> std::result::Result<DeployCtx, (DeployCtx, Error)>;
    async fn cancel(&self, _ctx: &DeployCtx, _err: &Error) {}
}

/// Runs the declared stages strictly in order; the first error terminates
/// and triggers LIFO cancellation of the stages that already succeeded.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn up() -> Self {
        Self::new(vec![
            Box::new(CleanupWorkspace),
            Box::new(DownloadInstaller),
            Box::new(CopyWorkspace),
            Box::new(DockerComposeFileParse),
            Box::new(LoadImage),
            Box::new(DockerComposeUp),
        ])
    }

    pub fn down() -> Self {
        Self::new(vec![Box::new(DockerComposeDown)])
    }

    pub async fn run(&self, mut ctx: DeployCtx) -> Result<DeployCtx> {
        let mut ran: Vec<&Box<dyn Stage>> = Vec::new();
        for stage in &self.stages {
            tracing::info!(stage = stage.name(), service = %ctx.service.name, "pipeline stage starting");
            ctx = match stage.process(ctx).await {
                Ok(ctx) => ctx,
                Err((ctx, err)) => {
                    ctx.writer.send(ProgressEvent::Error(err.to_string())).await;
                    for done_stage in ran.into_iter().rev() {
                        done_stage.cancel(&ctx, &err).await;
                    }
                    return Err(err);
                }
            };
            ran.push(stage);
        }
        ctx.writer.send(ProgressEvent::Done).await;
        Ok(ctx)
    }
}
