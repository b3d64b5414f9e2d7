use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bytes::Bytes;
use futures::StreamExt;
use panel_common::error::{Error, ErrorKind, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

use crate::state::NodeState;

use super::{chunk, PushEvent, PushSender};

enum Command {
    Write(Vec<u8>),
    Close,
}

/// One `docker exec` attach session against a container on a node,
/// multiplexed the same way a host shell is.
pub struct ExecSession {
    connection_id: String,
    exec_id: String,
    commands: mpsc::UnboundedSender<Command>,
    resize: Arc<Mutex<(Arc<bollard::Docker>, String)>>,
    closed: AtomicBool,
}

impl ExecSession {
    pub async fn start(
        connection_id: String,
        node_state: Arc<NodeState>,
        container_id: String,
        command: String,
        push: PushSender,
    ) -> Result<Self> {
        let docker = node_state.runtime().await?;

        let exec = docker
            .create_exec(
                &container_id,
                CreateExecOptions {
                    attach_stdin: Some(true),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    cmd: Some(vec![command]),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;

        let started = docker
            .start_exec(&exec.id, Some(StartExecOptions { detach: false, ..Default::default() }))
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;

        let StartExecResults::Attached { mut output, mut input } = started else {
            return Err(Error::custom(ErrorKind::Fatal, "exec start returned a detached result"));
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let conn_id = connection_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = output.next() => {
                        match msg {
                            Some(Ok(log)) => {
                                let bytes = log.into_bytes();
                                for piece in chunk(&bytes) {
                                    push.send(PushEvent::DockerExecData {
                                        connection_id: conn_id.clone(),
                                        data: Bytes::copy_from_slice(piece),
                                    })
                                    .await;
                                }
                            }
                            Some(Err(e)) => {
                                push.send(PushEvent::Error {
                                    connection_id: conn_id.clone(),
                                    message: e.to_string(),
                                })
                                .await;
                                break;
                            }
                            None => break,
                        }
                    }
                    cmd = rx.recv() => {
                        match cmd {
                            Some(Command::Write(data)) => {
                                let _ = input.write_all(&data).await;
                            }
                            Some(Command::Close) | None => break,
                        }
                    }
                }
            }
        });

        Ok(Self {
            connection_id,
            exec_id: exec.id.clone(),
            commands: tx,
            resize: Arc::new(Mutex::new((docker, exec.id))),
            closed: AtomicBool::new(false),
        })
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let _ = self.commands.send(Command::Write(data.to_vec()));
        Ok(())
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        let guard = self.resize.lock().await;
        guard
            .0
            .resize_exec(
                &guard.1,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(connection_id = %self.connection_id, exec_id = %self.exec_id, "closing exec session");
        let _ = self.commands.send(Command::Close);
    }
}
