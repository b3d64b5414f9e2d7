use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use panel_common::error::{Error, ErrorKind, Result};
use portable_pty::{native_pty_system, CommandBuilder, MasterPty, PtySize};
use russh::{client, ChannelMsg};
use tokio::sync::{mpsc, Mutex};

use crate::state::NodeState;

use super::{chunk, PushEvent, PushSender};

enum RemoteCommand {
    Write(Vec<u8>),
    Resize(u16, u16),
    Close,
}

enum Inner {
    Local {
        master: StdMutex<Box<dyn MasterPty + Send>>,
        writer: StdMutex<Box<dyn Write + Send>>,
    },
    Remote {
        commands: mpsc::UnboundedSender<RemoteCommand>,
    },
}

/// One interactive host-shell PTY: a local `portable-pty` process or an
/// SSH `pty-req` + shell channel, depending on the node. At most one
/// exists per connection, enforced by `SessionHub`.
pub struct ShellSession {
    connection_id: String,
    inner: Inner,
    closed: AtomicBool,
}

impl ShellSession {
    pub async fn start(
        connection_id: String,
        node_state: Arc<NodeState>,
        cols: u16,
        rows: u16,
        push: PushSender,
    ) -> Result<Self> {
        if node_state.node.is_local {
            Self::start_local(connection_id, cols, rows, push)
        } else {
            Self::start_remote(connection_id, node_state, cols, rows, push).await
        }
    }

    fn start_local(connection_id: String, cols: u16, rows: u16, push: PushSender) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::custom(ErrorKind::Io, e.to_string()))?;

        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        let mut cmd = CommandBuilder::new(shell);
        if let Ok(home) = std::env::var("HOME") {
            cmd.cwd(&home);
            cmd.env("HOME", home);
        }
        cmd.env("TERM", "xterm-256color");

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::custom(ErrorKind::Io, e.to_string()))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::custom(ErrorKind::Io, e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::custom(ErrorKind::Io, e.to_string()))?;

        let conn_id = connection_id.clone();
        tokio::task::spawn_blocking(move || {
            let handle = tokio::runtime::Handle::current();
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        for piece in chunk(&buf[..n]) {
                            let data = Bytes::copy_from_slice(piece);
                            let push = push.clone();
                            let conn_id = conn_id.clone();
                            handle.block_on(push.send(PushEvent::SshData {
                                connection_id: conn_id,
                                data,
                            }));
                        }
                    }
                }
            }
        });

        tokio::task::spawn_blocking(move || {
            let _ = child.wait();
        });

        Ok(Self {
            connection_id,
            inner: Inner::Local {
                master: StdMutex::new(pair.master),
                writer: StdMutex::new(writer),
            },
            closed: AtomicBool::new(false),
        })
    }

    async fn start_remote(
        connection_id: String,
        node_state: Arc<NodeState>,
        cols: u16,
        rows: u16,
        push: PushSender,
    ) -> Result<Self> {
        let password = node_state.decrypt_ssh_password()?;
        let config = Arc::new(client::Config::default());
        let addr = format!("{}:{}", node_state.node.address, node_state.node.ssh_port);
        let mut session = client::connect(config, addr, AcceptAllHostKeys)
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        let authed = session
            .authenticate_password(&node_state.node.ssh_user, &password)
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        if !authed {
            return Err(Error::custom(ErrorKind::Unreachable, "ssh authentication failed"));
        }

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        channel
            .request_pty(false, "xterm-256color", cols as u32, rows as u32, 0, 0, &[])
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        channel
            .request_shell(false)
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<RemoteCommand>();
        let conn_id = connection_id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { data }) => {
                                for piece in chunk(&data) {
                                    push.send(PushEvent::SshData {
                                        connection_id: conn_id.clone(),
                                        data: Bytes::copy_from_slice(piece),
                                    })
                                    .await;
                                }
                            }
                            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
                            _ => {}
                        }
                    }
                    cmd = rx.recv() => {
                        match cmd {
                            Some(RemoteCommand::Write(data)) => {
                                let _ = channel.data(&data[..]).await;
                            }
                            Some(RemoteCommand::Resize(cols, rows)) => {
                                let _ = channel.window_change(cols as u32, rows as u32, 0, 0).await;
                            }
                            Some(RemoteCommand::Close) | None => {
                                let _ = channel.close().await;
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            connection_id,
            inner: Inner::Remote { commands: tx },
            closed: AtomicBool::new(false),
        })
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        match &self.inner {
            Inner::Local { writer, .. } => {
                let mut writer = writer.lock().unwrap();
                writer.write_all(data).map_err(|e| Error::source(ErrorKind::Io, e))?;
                Ok(())
            }
            Inner::Remote { commands } => {
                let _ = commands.send(RemoteCommand::Write(data.to_vec()));
                Ok(())
            }
        }
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        match &self.inner {
            Inner::Local { master, .. } => {
                let master = master.lock().unwrap();
                master
                    .resize(PtySize {
                        rows,
                        cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    })
                    .map_err(|e| Error::custom(ErrorKind::Io, e.to_string()))
            }
            Inner::Remote { commands } => {
                let _ = commands.send(RemoteCommand::Resize(cols, rows));
                Ok(())
            }
        }
    }

    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(connection_id = %self.connection_id, "closing shell session");
        if let Inner::Remote { commands } = &self.inner {
            let _ = commands.send(RemoteCommand::Close);
        }
    }
}

/// Host key verification is intentionally skipped: the administrator
/// supplies credentials directly, there is no trust-on-first-use store.
struct AcceptAllHostKeys;

#[async_trait::async_trait]
impl client::Handler for AcceptAllHostKeys {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}
