use std::io::Read;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::StreamExt;
use panel_common::error::{Error, ErrorKind, Result};
use serde_yaml::Value as Yaml;
use tar::Archive;

use crate::exec::ExecOptions;

use super::{DeployCtx, ProgressEvent, Stage};

fn fail(ctx: DeployCtx, err: Error) -> (DeployCtx, Error) {
    (ctx, err)
}

pub struct CleanupWorkspace;

#[async_trait]
impl Stage for CleanupWorkspace {
    fn name(&self) -> &'static str {
        "cleanup_workspace"
    }

    async fn process(&self, mut ctx: DeployCtx) -> std::result::Result<DeployCtx, (DeployCtx, Error)> {
        let path = format!("{}/services/{}", ctx.node.data_path.trim_end_matches('/'), ctx.service.name);
        if path.trim_end_matches('/').is_empty() || path == "/" {
            let err = Error::custom(ErrorKind::Fatal, "refusing to operate on root path");
            return Err(fail(ctx, err));
        }
        ctx.writer.info(format!("preparing workspace at {path}")).await;
        let rm = ctx
            .node_exec
            .execute_output(&format!("rm -rf '{}'", path.replace('\'', "'\\''")), &ExecOptions::default())
            .await;
        if let Err(e) = rm {
            return Err(fail(ctx, e));
        }
        if let Err(e) = ctx.node_exec.mkdir_p(&path).await {
            return Err(fail(ctx, e));
        }
        ctx.service_path = path;
        Ok(ctx)
    }

    async fn cancel(&self, ctx: &DeployCtx, _err: &Error) {
        let _ = ctx
            .node_exec
            .execute_output(
                &format!("rm -rf '{}'", ctx.service_path.replace('\'', "'\\''")),
                &ExecOptions::default(),
            )
            .await;
    }
}

pub struct DownloadInstaller;

#[async_trait]
impl Stage for DownloadInstaller {
    fn name(&self) -> &'static str {
        "download_installer"
    }

    async fn process(&self, mut ctx: DeployCtx) -> std::result::Result<DeployCtx, (DeployCtx, Error)> {
        let Some(static_path) = ctx.app.static_path.clone() else {
            ctx.writer.info("no installer payload configured, skipping").await;
            return Ok(ctx);
        };

        ctx.writer.info(format!("fetching installer payload from {static_path}")).await;
        let bytes = if static_path.starts_with("http://") || static_path.starts_with("https://") {
            match reqwest::get(&static_path).await.and_then(|r| r.error_for_status()) {
                Ok(resp) => match resp.bytes().await {
                    Ok(b) => b.to_vec(),
                    Err(e) => return Err(fail(ctx, Error::source(ErrorKind::Io, e))),
                },
                Err(e) => return Err(fail(ctx, Error::source(ErrorKind::Io, e))),
            }
        } else {
            match tokio::fs::read(&static_path).await {
                Ok(b) => b,
                Err(e) => return Err(fail(ctx, e.into())),
            }
        };

        let is_archive = static_path.ends_with(".tar.gz") || static_path.ends_with(".tgz");
        if is_archive {
            let dest = ctx.service_path.clone();
            let skipped = match extract_tar_gz(&bytes, &dest) {
                Ok(skipped) => skipped,
                Err(e) => return Err(fail(ctx, e)),
            };
            for entry in skipped {
                ctx.writer
                    .warning(format!("skipped archive entry escaping destination: {entry}"))
                    .await;
            }
        } else {
            let filename = Path::new(&static_path)
                .file_name()
                .map(|f| f.to_string_lossy().to_string())
                .unwrap_or_else(|| "installer".to_string());
            let target = format!("{}/{}", ctx.service_path, filename);
            if let Err(e) = ctx.node_exec.write_file(&target, &bytes).await {
                return Err(fail(ctx, e));
            }
        }
        Ok(ctx)
    }
}

/// Extracts a `.tar.gz` into `dest`, skipping (and reporting) any member
/// whose cleaned path would escape `dest`. Never writes outside `dest`.
fn extract_tar_gz(bytes: &[u8], dest: &str) -> Result<Vec<String>> {
    let dest_root = PathBuf::from(dest);
    let decoder = GzDecoder::new(bytes);
    let mut archive = Archive::new(decoder);
    let mut skipped = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| Error::source(ErrorKind::Io, e))?
    {
        let mut entry = entry.map_err(|e| Error::source(ErrorKind::Io, e))?;
        let raw_path = entry
            .path()
            .map_err(|e| Error::source(ErrorKind::Io, e))?
            .into_owned();

        if !is_path_contained(&raw_path) {
            skipped.push(raw_path.to_string_lossy().to_string());
            continue;
        }
        let target = dest_root.join(&raw_path);

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::source(ErrorKind::Io, e))?;
            continue;
        }
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::source(ErrorKind::Io, e))?;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(|e| Error::source(ErrorKind::Io, e))?;
        std::fs::write(&target, &buf).map_err(|e| Error::source(ErrorKind::Io, e))?;

        let mode = entry.header().mode().unwrap_or(0);
        if mode != 0 {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode));
            }
        }
    }
    Ok(skipped)
}

fn is_path_contained(path: &Path) -> bool {
    !path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
}

pub struct CopyWorkspace;

#[async_trait]
impl Stage for CopyWorkspace {
    fn name(&self) -> &'static str {
        "copy_workspace"
    }

    async fn process(&self, mut ctx: DeployCtx) -> std::result::Result<DeployCtx, (DeployCtx, Error)> {
        let workspace_root = format!(
            "{}/workspace/{}",
            ctx.node.data_path.trim_end_matches('/'),
            ctx.app.name
        );
        if !Path::new(&workspace_root).exists() {
            ctx.writer.info("no app workspace templates to copy").await;
            return Ok(ctx);
        }

        let funcs = ctx.funcs.clone();
        let env = ctx.env.clone();
        let walker = walkdir_files(&workspace_root);
        for (relative, absolute, is_dir) in walker {
            let target = format!("{}/{}", ctx.service_path, relative);
            if is_dir {
                if let Err(e) = ctx.node_exec.mkdir_p(&target).await {
                    return Err(fail(ctx, e));
                }
                continue;
            }
            let contents = match tokio::fs::read_to_string(&absolute).await {
                Ok(c) => c,
                Err(_) => {
                    // not valid UTF-8 (binary asset): copy verbatim, no templating.
                    let bytes = match tokio::fs::read(&absolute).await {
                        Ok(b) => b,
                        Err(e) => return Err(fail(ctx, e.into())),
                    };
                    if let Err(e) = ctx.node_exec.write_file(&target, &bytes).await {
                        return Err(fail(ctx, e));
                    }
                    continue;
                }
            };
            let rendered = match crate::template::render(&relative, &contents, &env, &ctx.envs, &funcs).await {
                Ok(r) => r,
                Err(e) => return Err(fail(ctx, e)),
            };
            if let Err(e) = ctx.node_exec.write_file(&target, rendered.as_bytes()).await {
                return Err(fail(ctx, e));
            }
        }
        Ok(ctx)
    }
}

fn walkdir_files(root: &str) -> Vec<(String, String, bool)> {
    let mut out = Vec::new();
    let mut stack = vec![PathBuf::from(root)];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .to_string();
            if path.is_dir() {
                out.push((relative, path.to_string_lossy().to_string(), true));
                stack.push(path);
            } else {
                out.push((relative, path.to_string_lossy().to_string(), false));
            }
        }
    }
    out
}

const MANAGED_LABEL_KEYS: [&str; 3] = ["owner", "managed-by", "service"];

pub struct DockerComposeFileParse;

#[async_trait]
impl Stage for DockerComposeFileParse {
    fn name(&self) -> &'static str {
        "docker_compose_parse"
    }

    async fn process(&self, mut ctx: DeployCtx) -> std::result::Result<DeployCtx, (DeployCtx, Error)> {
        let Some(source) = ctx.app.docker_compose.clone() else {
            let err = Error::custom(ErrorKind::BadRequest, "app has no docker_compose template");
            return Err(fail(ctx, err));
        };

        let rendered = match crate::template::render(&ctx.app.name, &source, &ctx.env, &ctx.envs, &ctx.funcs).await {
            Ok(r) => r,
            Err(e) => return Err(fail(ctx, e)),
        };

        let project_id = ctx.service.app_id.to_string();
        let labelled = match inject_labels(&rendered, &project_id, &ctx.service.name) {
            Ok(y) => y,
            Err(e) => return Err(fail(ctx, e)),
        };
        ctx.rendered_compose = Some(labelled);
        Ok(ctx)
    }
}

/// Merges `{owner, managed-by, service}` into every service's `labels:`
/// mapping. Idempotent: running it twice on its own output is a no-op.
fn inject_labels(rendered: &str, project_id: &str, service_name: &str) -> Result<String> {
    let mut doc: Yaml =
        serde_yaml::from_str(rendered).map_err(|e| Error::custom(ErrorKind::BadRequest, format!("invalid compose yaml: {e}")))?;

    let services = doc
        .as_mapping_mut()
        .and_then(|m| m.get_mut(Yaml::String("services".into())))
        .and_then(|s| s.as_mapping_mut())
        .ok_or_else(|| Error::custom(ErrorKind::BadRequest, "compose manifest has no `services:` mapping"))?;

    let values = [
        ("owner", project_id.to_string()),
        ("managed-by", project_id.to_string()),
        ("service", service_name.to_string()),
    ];

    for (_, svc) in services.iter_mut() {
        let Some(svc_map) = svc.as_mapping_mut() else { continue };
        let labels_key = Yaml::String("labels".into());
        let labels = svc_map
            .entry(labels_key)
            .or_insert_with(|| Yaml::Mapping(Default::default()));
        let Some(labels_map) = labels.as_mapping_mut() else { continue };
        for (key, value) in &values {
            if MANAGED_LABEL_KEYS.contains(key) {
                labels_map.insert(Yaml::String((*key).into()), Yaml::String(value.clone()));
            }
        }
    }

    serde_yaml::to_string(&doc).map_err(|e| Error::custom(ErrorKind::Fatal, e.to_string()))
}

pub struct LoadImage;

#[async_trait]
impl Stage for LoadImage {
    fn name(&self) -> &'static str {
        "load_image"
    }

    async fn process(&self, mut ctx: DeployCtx) -> std::result::Result<DeployCtx, (DeployCtx, Error)> {
        let Some(compose) = ctx.rendered_compose.clone() else {
            let err = Error::custom(ErrorKind::Fatal, "no rendered compose manifest to inspect");
            return Err(fail(ctx, err));
        };
        let doc: Yaml = match serde_yaml::from_str(&compose) {
            Ok(d) => d,
            Err(e) => return Err(fail(ctx, Error::custom(ErrorKind::Fatal, e.to_string()))),
        };
        let images = images_referenced(&doc);

        let target_docker = match ctx.node_manager.get(ctx.node.id).await {
            Ok(state) => match state.runtime().await {
                Ok(d) => d,
                Err(e) => return Err(fail(ctx, e)),
            },
            Err(e) => return Err(fail(ctx, e)),
        };

        for image in images {
            if image_present(&target_docker, &image).await {
                continue;
            }
            ctx.writer.info(format!("image {image} missing on target, searching peers")).await;
            let mut transferred = false;
            for peer_id in ctx.node_manager.node_ids().await {
                if peer_id == ctx.node.id {
                    continue;
                }
                let Ok(peer_state) = ctx.node_manager.get(peer_id).await else { continue };
                let Ok(peer_docker) = peer_state.runtime().await else { continue };
                if !image_present(&peer_docker, &image).await {
                    continue;
                }
                if transfer_image(&peer_docker, &target_docker, &image).await.is_ok() {
                    ctx.writer.info(format!("transferred {image} from node {peer_id}")).await;
                    transferred = true;
                    break;
                }
            }
            if !transferred {
                ctx.writer
                    .warning(format!("image {image} not found on any registered node"))
                    .await;
            }
        }
        Ok(ctx)
    }
}

fn images_referenced(doc: &Yaml) -> Vec<String> {
    let mut out = Vec::new();
    let Some(services) = doc
        .as_mapping()
        .and_then(|m| m.get(Yaml::String("services".into())))
        .and_then(|s| s.as_mapping())
    else {
        return out;
    };
    for (_, svc) in services {
        let Some(svc_map) = svc.as_mapping() else { continue };
        let has_build = svc_map.contains_key(Yaml::String("build".into()));
        if has_build {
            continue;
        }
        if let Some(Yaml::String(image)) = svc_map.get(Yaml::String("image".into())) {
            out.push(image.clone());
        }
    }
    out
}

async fn image_present(docker: &bollard::Docker, image: &str) -> bool {
    docker.inspect_image(image).await.is_ok()
}

/// Peer-to-peer image move: stream an `ImageSave` tarball off the source
/// node directly into an `ImageLoad` on the target, without buffering the
/// whole image in memory.
async fn transfer_image(source: &bollard::Docker, target: &bollard::Docker, image: &str) -> Result<()> {
    let export_stream = source
        .export_image(image)
        .filter_map(|chunk| async move { chunk.ok() })
        .map(Ok::<_, std::io::Error>);
    let import_body = hyper::Body::wrap_stream(export_stream);
    let mut import_stream = target.import_image(
        bollard::image::ImportImageOptions { quiet: true },
        import_body,
        None,
    );
    while let Some(item) = import_stream.next().await {
        item.map_err(|e| Error::source(ErrorKind::Io, e))?;
    }
    Ok(())
}

pub struct DockerComposeUp;

#[async_trait]
impl Stage for DockerComposeUp {
    fn name(&self) -> &'static str {
        "docker_compose_up"
    }

    async fn process(&self, mut ctx: DeployCtx) -> std::result::Result<DeployCtx, (DeployCtx, Error)> {
        let Some(compose) = ctx.rendered_compose.clone() else {
            let err = Error::custom(ErrorKind::Fatal, "no rendered compose manifest to apply");
            return Err(fail(ctx, err));
        };

        let compose_path = format!("{}/docker_compose.yml", ctx.service_path);
        if let Err(e) = ctx.node_exec.write_file(&compose_path, compose.as_bytes()).await {
            return Err(fail(ctx, e));
        }

        let compose_cmd = match resolve_compose_cmd(&ctx).await {
            Ok(cmd) => cmd,
            Err(e) => return Err(fail(ctx, e)),
        };

        let writer = ctx.writer.clone();
        let on_stdout = |line: &str| {
            let writer = writer.clone();
            let line = line.to_string();
            tokio::spawn(async move { writer.info(line).await });
        };
        let writer2 = ctx.writer.clone();
        let on_stderr = |line: &str| {
            let writer = writer2.clone();
            let line = line.to_string();
            tokio::spawn(async move { writer.warning(line).await });
        };

        let cmd = format!("{compose_cmd} -f '{compose_path}' up -d --build");
        if let Err(e) = ctx
            .node_exec
            .execute_command(&cmd, &ExecOptions::default(), &on_stdout, &on_stderr)
            .await
        {
            return Err(fail(ctx, e));
        }

        ctx.deploy_info.insert("docker_compose_file_path".to_string(), compose_path);
        Ok(ctx)
    }

    async fn cancel(&self, ctx: &DeployCtx, _err: &Error) {
        if let Some(path) = ctx.deploy_info.get("docker_compose_file_path") {
            if let Ok(cmd) = resolve_compose_cmd(ctx).await {
                let _ = ctx
                    .node_exec
                    .execute_output(&format!("{cmd} -f '{path}' down"), &ExecOptions::default())
                    .await;
            }
        }
    }
}

async fn resolve_compose_cmd(ctx: &DeployCtx) -> Result<String> {
    if ctx
        .node_exec
        .execute_output("docker compose version", &ExecOptions::default())
        .await
        .is_ok()
    {
        return Ok("docker compose".to_string());
    }
    if ctx
        .node_exec
        .execute_output("docker-compose version", &ExecOptions::default())
        .await
        .is_ok()
    {
        return Ok("docker-compose".to_string());
    }
    Err(Error::custom(ErrorKind::Fatal, "neither `docker compose` nor `docker-compose` is available"))
}

pub struct DockerComposeDown;

#[async_trait]
impl Stage for DockerComposeDown {
    fn name(&self) -> &'static str {
        "docker_compose_down"
    }

    async fn process(&self, mut ctx: DeployCtx) -> std::result::Result<DeployCtx, (DeployCtx, Error)> {
        let Some(path) = ctx
            .service
            .deploy_info
            .as_ref()
            .and_then(|d| d.get("docker_compose_file_path"))
            .and_then(|v| v.as_str())
            .map(String::from)
        else {
            let err = Error::custom(ErrorKind::NotFound, "service has no recorded compose file to tear down");
            return Err(fail(ctx, err));
        };

        let compose_cmd = match resolve_compose_cmd(&ctx).await {
            Ok(cmd) => cmd,
            Err(e) => return Err(fail(ctx, e)),
        };

        ctx.writer.info(format!("stopping services via {path}")).await;
        if let Err(e) = ctx
            .node_exec
            .execute_output(&format!("{compose_cmd} -f '{path}' down"), &ExecOptions::default())
            .await
        {
            return Err(fail(ctx, e));
        }
        Ok(ctx)
    }
}
