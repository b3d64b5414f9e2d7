use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use bollard::container::{InspectContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions};
use bollard::image::ListImagesOptions;
use bollard::network::ListNetworksOptions;
use bollard::volume::ListVolumesOptions;
use futures::stream::Stream;
use futures::StreamExt as _;
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::Envelope;
use serde::Deserialize;

use super::AppState;

/// Which node to run the command against, carried on every proxied
/// docker request via the `X-Node-ID` header.
fn node_id_header(headers: &axum::http::HeaderMap) -> Result<i64> {
    headers
        .get("X-Node-ID")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::custom(ErrorKind::BadRequest, "missing or invalid X-Node-ID header"))
}

pub async fn handle_collection(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    headers: axum::http::HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let node_id = node_id_header(&headers)?;
    let docker = state.node_manager.get(node_id).await?.runtime().await?;

    match op.as_str() {
        "containers" => {
            let containers = docker
                .list_containers(Some(ListContainersOptions::<String> { all: true, ..Default::default() }))
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            ok(containers)
        }
        "images" => {
            let images = docker
                .list_images(Some(ListImagesOptions::<String> { all: true, ..Default::default() }))
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            ok(images)
        }
        "volumes" => {
            let volumes = docker
                .list_volumes(Some(ListVolumesOptions::<String>::default()))
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            ok(volumes)
        }
        "networks" => {
            let networks = docker
                .list_networks(Some(ListNetworksOptions::<String>::default()))
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            ok(networks)
        }
        "info" => {
            let info = docker.info().await.map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            ok(info)
        }
        _ => Err(Error::from_kind(ErrorKind::BadRequest)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ContainerOpRequest {
    pub container_id: String,
}

pub async fn handle_container(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Result<axum::response::Response> {
    let node_id = node_id_header(&headers)?;
    let docker = state.node_manager.get(node_id).await?.runtime().await?;
    let req: ContainerOpRequest =
        serde_json::from_slice(&body).map_err(|e| Error::custom(ErrorKind::BadRequest, e.to_string()))?;

    match op.as_str() {
        "start" => {
            docker
                .start_container::<String>(&req.container_id, None)
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            Ok(ok_response(serde_json::Value::Null))
        }
        "stop" => {
            docker
                .stop_container(&req.container_id, None)
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            Ok(ok_response(serde_json::Value::Null))
        }
        "restart" => {
            docker
                .restart_container(&req.container_id, None)
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            Ok(ok_response(serde_json::Value::Null))
        }
        "remove" => {
            docker
                .remove_container(&req.container_id, Some(RemoveContainerOptions { force: true, ..Default::default() }))
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            Ok(ok_response(serde_json::Value::Null))
        }
        "inspect" => {
            let info = docker
                .inspect_container(&req.container_id, None::<InspectContainerOptions>)
                .await
                .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
            Ok(ok_response(serde_json::to_value(info).unwrap_or_default()))
        }
        "log" => {
            let options = LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                tail: "200".to_string(),
                ..Default::default()
            };
            let stream = docker.logs(&req.container_id, Some(options)).map(|chunk| {
                let data = match chunk {
                    Ok(log) => log.to_string(),
                    Err(e) => format!("log stream error: {e}"),
                };
                Ok(Event::default().data(data))
            });
            Ok(sse_response(stream))
        }
        _ => Err(Error::from_kind(ErrorKind::BadRequest)),
    }
}

fn ok(data: impl serde::Serialize) -> Result<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(Envelope::ok(data)).unwrap()))
}

fn ok_response(data: impl serde::Serialize) -> axum::response::Response {
    use axum::response::IntoResponse;
    Json(serde_json::to_value(Envelope::ok(data)).unwrap()).into_response()
}

fn sse_response(
    stream: impl Stream<Item = std::result::Result<Event, std::convert::Infallible>> + Send + 'static,
) -> axum::response::Response {
    use axum::response::IntoResponse;
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
