use std::sync::Arc;
use std::time::Duration;

use panel_common::error::{Error, ErrorKind, Result};
use russh::client::{self, Handle};
use russh::ChannelMsg;
use russh_sftp::client::SftpSession;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::{env_export_prefix, exit_status_error, parent_dir, ExecOptions, LineSink};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Host key verification is intentionally skipped: the administrator
/// supplies credentials directly, there is no trust-on-first-use store.
struct AcceptAll;

#[async_trait::async_trait]
impl client::Handler for AcceptAll {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// `NodeExec` variant for a remote host reached over SSH with
/// username+password auth. One SSH session (channel) is opened per
/// command; a parallel SFTP channel handles file I/O.
pub struct SshExec {
    address: String,
    port: u16,
    user: String,
    password: String,
    handle: Mutex<Option<Arc<Handle<AcceptAll>>>>,
}

impl SshExec {
    pub fn new(address: String, port: u16, user: String, password: String) -> Self {
        Self {
            address,
            port,
            user,
            password,
            handle: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<Arc<Handle<AcceptAll>>> {
        let config = Arc::new(client::Config::default());
        let addr = format!("{}:{}", self.address, self.port);
        let connect = client::connect(config, addr, AcceptAll);
        let mut session = tokio::time::timeout(DIAL_TIMEOUT, connect)
            .await
            .map_err(|_| Error::from_kind(ErrorKind::Unreachable))?
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;

        let authenticated = session
            .authenticate_password(&self.user, &self.password)
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        if !authenticated {
            return Err(Error::custom(ErrorKind::Unreachable, "ssh authentication failed"));
        }
        Ok(Arc::new(session))
    }

    async fn handle(&self) -> Result<Arc<Handle<AcceptAll>>> {
        let mut guard = self.handle.lock().await;
        if let Some(h) = guard.as_ref() {
            return Ok(h.clone());
        }
        let h = self.connect().await?;
        *guard = Some(h.clone());
        Ok(h)
    }

    async fn sftp(&self) -> Result<SftpSession> {
        let handle = self.handle().await?;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))
    }

    fn full_command(cmd: &str, opts: &ExecOptions) -> String {
        let prefix = env_export_prefix(&opts.env);
        let cd = opts
            .working_dir
            .as_ref()
            .map(|d| format!("cd '{}' && ", d.replace('\'', "'\\''")))
            .unwrap_or_default();
        let body = if prefix.is_empty() {
            format!("{cd}{cmd}")
        } else {
            format!("{prefix} {cd}{cmd}")
        };
        format!("bash -lc '{}'", body.replace('\'', "'\\''"))
    }

    pub async fn init(&self) -> Result<()> {
        self.handle().await.map(|_| ())
    }

    pub async fn close(&self) -> Result<()> {
        let mut guard = self.handle.lock().await;
        if let Some(h) = guard.take() {
            let _ = h.disconnect(russh::Disconnect::ByApplication, "", "en").await;
        }
        Ok(())
    }

    pub async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        self.mkdir_p_parent(path).await?;
        let sftp = self.sftp().await?;
        let mut file = sftp
            .create(path)
            .await
            .map_err(|e| Error::source(ErrorKind::Io, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| Error::source(ErrorKind::Io, e))?;
        Ok(())
    }

    pub async fn write_file_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<()> {
        self.mkdir_p_parent(path).await?;
        let sftp = self.sftp().await?;
        let mut file = sftp
            .create(path)
            .await
            .map_err(|e| Error::source(ErrorKind::Io, e))?;
        let mut buf = [0u8; 8192];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|e| Error::source(ErrorKind::Io, e))?;
        }
        Ok(())
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let sftp = self.sftp().await?;
        let mut file = sftp
            .open(path)
            .await
            .map_err(|e| Error::source(ErrorKind::Io, e))?;
        let mut out = Vec::new();
        file.read_to_end(&mut out)
            .await
            .map_err(|e| Error::source(ErrorKind::Io, e))?;
        Ok(out)
    }

    pub async fn read_file_stream(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let bytes = self.read_file(path).await?;
        writer.write_all(&bytes).await?;
        Ok(())
    }

    pub async fn mkdir_p(&self, path: &str) -> Result<()> {
        self.execute_output(&format!("mkdir -p '{}'", path.replace('\'', "'\\''")), &ExecOptions::default())
            .await
            .map(|_| ())
    }

    async fn mkdir_p_parent(&self, path: &str) -> Result<()> {
        if let Some(dir) = parent_dir(path) {
            self.mkdir_p(&dir).await?;
        }
        Ok(())
    }

    pub async fn execute_output(&self, cmd: &str, opts: &ExecOptions) -> Result<(String, String)> {
        let mut stdout = String::new();
        let mut stderr = String::new();
        let code = self
            .run(cmd, opts, &mut |line: &str, is_err: bool| {
                if is_err {
                    stderr.push_str(line);
                    stderr.push('\n');
                } else {
                    stdout.push_str(line);
                    stdout.push('\n');
                }
            })
            .await?;
        if code != 0 {
            return Err(exit_status_error(code, &stderr));
        }
        Ok((stdout, stderr))
    }

    pub async fn execute_command(
        &self,
        cmd: &str,
        opts: &ExecOptions,
        on_stdout: LineSink<'_>,
        on_stderr: LineSink<'_>,
    ) -> Result<()> {
        let mut stderr_tail = String::new();
        let code = self
            .run(cmd, opts, &mut |line: &str, is_err: bool| {
                if is_err {
                    stderr_tail.push_str(line);
                    stderr_tail.push('\n');
                    on_stderr(line);
                } else {
                    on_stdout(line);
                }
            })
            .await?;
        if code != 0 {
            return Err(exit_status_error(code, &stderr_tail));
        }
        Ok(())
    }

    async fn run(
        &self,
        cmd: &str,
        opts: &ExecOptions,
        mut on_line: impl FnMut(&str, bool),
    ) -> Result<i32> {
        let handle = self.handle().await?;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;
        channel
            .exec(true, Self::full_command(cmd, opts))
            .await
            .map_err(|e| Error::source(ErrorKind::Unreachable, e))?;

        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut code = 0;

        loop {
            let Some(msg) = channel.wait().await else {
                break;
            };
            match msg {
                ChannelMsg::Data { data } => {
                    stdout_buf.extend_from_slice(&data);
                    drain_lines(&mut stdout_buf, false, &mut on_line);
                }
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    stderr_buf.extend_from_slice(&data);
                    drain_lines(&mut stderr_buf, true, &mut on_line);
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    code = exit_status as i32;
                }
                ChannelMsg::Eof | ChannelMsg::Close => break,
                _ => {}
            }
        }
        if !stdout_buf.is_empty() {
            on_line(&String::from_utf8_lossy(&stdout_buf), false);
        }
        if !stderr_buf.is_empty() {
            on_line(&String::from_utf8_lossy(&stderr_buf), true);
        }
        Ok(code)
    }
}

fn drain_lines(buf: &mut Vec<u8>, is_err: bool, on_line: &mut impl FnMut(&str, bool)) {
    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line[..line.len() - 1]).to_string();
        on_line(&line, is_err);
    }
}
