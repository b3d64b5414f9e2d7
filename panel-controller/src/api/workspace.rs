use std::path::{Component, Path as StdPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use base64::Engine;
use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::Envelope;
use serde::Deserialize;

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRequest {
    pub app_name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content_base64: String,
}

/// Resolves `app_name`/`path` under `<data>/workspace/`, rejecting any
/// component that would escape the app's root (`..`, absolute paths).
fn resolve(data_path: &str, app_name: &str, relative: &str) -> Result<PathBuf> {
    if app_name.is_empty() || app_name.contains(['/', '\\']) {
        return Err(Error::custom(ErrorKind::BadRequest, "invalid app name"));
    }
    let root = StdPath::new(data_path).join("workspace").join(app_name);
    let mut resolved = root.clone();
    for component in StdPath::new(relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::custom(ErrorKind::BadRequest, "path escapes workspace root"));
            }
        }
    }
    Ok(resolved)
}

pub async fn handle(
    State(state): State<Arc<AppState>>,
    Path(op): Path<String>,
    Json(req): Json<WorkspaceRequest>,
) -> Result<Json<serde_json::Value>> {
    let target = resolve(&state.config.data_path, &req.app_name, &req.path)?;

    match op.as_str() {
        "list" => {
            let mut entries = Vec::new();
            let mut dir = tokio::fs::read_dir(&target).await?;
            while let Some(entry) = dir.next_entry().await? {
                let metadata = entry.metadata().await?;
                entries.push(serde_json::json!({
                    "name": entry.file_name().to_string_lossy(),
                    "isDir": metadata.is_dir(),
                    "size": metadata.len(),
                }));
            }
            ok(entries)
        }
        "read" => {
            let bytes = tokio::fs::read(&target).await?;
            ok(base64::engine::general_purpose::STANDARD.encode(bytes))
        }
        "save" | "upload" => {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&req.content_base64)
                .map_err(|e| Error::custom(ErrorKind::BadRequest, e.to_string()))?;
            tokio::fs::write(&target, bytes).await?;
            ok(serde_json::Value::Null)
        }
        "mkdir" => {
            tokio::fs::create_dir_all(&target).await?;
            ok(serde_json::Value::Null)
        }
        "delete" => {
            let metadata = tokio::fs::metadata(&target).await?;
            if metadata.is_dir() {
                tokio::fs::remove_dir_all(&target).await?;
            } else {
                tokio::fs::remove_file(&target).await?;
            }
            ok(serde_json::Value::Null)
        }
        _ => Err(Error::from_kind(ErrorKind::BadRequest)),
    }
}

fn ok<T: serde::Serialize>(data: T) -> Result<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(Envelope::ok(data)).unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_parent_dir_escape() {
        let err = resolve("/data", "myapp", "../../etc/passwd").unwrap_err();
        assert_eq!(err.kind(), panel_common::error::ErrorKind::BadRequest);
    }

    #[test]
    fn accepts_nested_relative_path() {
        let resolved = resolve("/data", "myapp", "config/app.yaml").unwrap();
        assert_eq!(resolved, PathBuf::from("/data/workspace/myapp/config/app.yaml"));
    }
}
