mod exec_session;
mod shell_session;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use panel_common::error::{Error, ErrorKind, Result};
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::state::NodeManager;

pub use exec_session::ExecSession;
pub use shell_session::ShellSession;

const DEFAULT_COLS: u16 = 120;
const DEFAULT_ROWS: u16 = 32;
const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub enum PushEvent {
    SshData { connection_id: String, data: Bytes },
    DockerExecData { connection_id: String, data: Bytes },
    Error { connection_id: String, message: String },
}

/// Sender shared by every session belonging to one push-channel
/// connection, so writes back to the browser are totally ordered.
#[derive(Clone)]
pub struct PushSender {
    inner: Arc<Mutex<mpsc::UnboundedSender<PushEvent>>>,
}

impl PushSender {
    pub fn new(sender: mpsc::UnboundedSender<PushEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sender)),
        }
    }

    pub async fn send(&self, event: PushEvent) {
        let _ = self.inner.lock().await.send(event);
    }
}

pub fn clamp_size(cols: u16, rows: u16) -> (u16, u16) {
    (
        if cols == 0 { DEFAULT_COLS } else { cols },
        if rows == 0 { DEFAULT_ROWS } else { rows },
    )
}

pub fn default_shell(requested: &str) -> String {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        "sh".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Multiplexes interactive PTY sessions — host shell and container exec —
/// over a single per-connection push channel. At most one of each kind is
/// held per `connection_id`.
pub struct SessionHub {
    shell_sessions: RwLock<HashMap<String, Arc<ShellSession>>>,
    exec_sessions: RwLock<HashMap<String, Arc<ExecSession>>>,
    nodes: Arc<NodeManager>,
}

impl SessionHub {
    pub fn new(nodes: Arc<NodeManager>) -> Self {
        Self {
            shell_sessions: RwLock::new(HashMap::new()),
            exec_sessions: RwLock::new(HashMap::new()),
            nodes,
        }
    }

    pub async fn start_shell(
        &self,
        connection_id: String,
        node_id: i64,
        cols: u16,
        rows: u16,
        push: PushSender,
    ) -> Result<()> {
        if self.shell_sessions.read().await.contains_key(&connection_id) {
            return Err(Error::from_kind(ErrorKind::Conflict));
        }
        let (cols, rows) = clamp_size(cols, rows);
        let node_state = self.nodes.get(node_id).await?;
        let session = Arc::new(ShellSession::start(connection_id.clone(), node_state, cols, rows, push).await?);
        self.shell_sessions.write().await.insert(connection_id, session);
        Ok(())
    }

    pub async fn stop_shell(&self, connection_id: &str) -> Result<()> {
        if let Some(session) = self.shell_sessions.write().await.remove(connection_id) {
            session.close().await;
        }
        Ok(())
    }

    pub async fn write_shell(&self, connection_id: &str, data: &[u8]) -> Result<()> {
        let sessions = self.shell_sessions.read().await;
        let session = sessions.get(connection_id).ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        session.write(data).await
    }

    pub async fn resize_shell(&self, connection_id: &str, cols: u16, rows: u16) -> Result<()> {
        let (cols, rows) = clamp_size(cols, rows);
        let sessions = self.shell_sessions.read().await;
        let session = sessions.get(connection_id).ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        session.resize(cols, rows).await
    }

    pub async fn start_exec(
        &self,
        connection_id: String,
        node_id: i64,
        container_id: String,
        command: String,
        push: PushSender,
    ) -> Result<()> {
        if self.exec_sessions.read().await.contains_key(&connection_id) {
            return Err(Error::from_kind(ErrorKind::Conflict));
        }
        let command = default_shell(&command);
        let node_state = self.nodes.get(node_id).await?;
        let session = Arc::new(
            ExecSession::start(connection_id.clone(), node_state, container_id, command, push).await?,
        );
        self.exec_sessions.write().await.insert(connection_id, session);
        Ok(())
    }

    pub async fn stop_exec(&self, connection_id: &str) -> Result<()> {
        if let Some(session) = self.exec_sessions.write().await.remove(connection_id) {
            session.close().await;
        }
        Ok(())
    }

    pub async fn write_exec(&self, connection_id: &str, data: &[u8]) -> Result<()> {
        let sessions = self.exec_sessions.read().await;
        let session = sessions.get(connection_id).ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        session.write(data).await
    }

    pub async fn resize_exec(&self, connection_id: &str, cols: u16, rows: u16) -> Result<()> {
        let (cols, rows) = clamp_size(cols, rows);
        let sessions = self.exec_sessions.read().await;
        let session = sessions.get(connection_id).ok_or_else(|| Error::from_kind(ErrorKind::NotFound))?;
        session.resize(cols, rows).await
    }

    /// Tears down every session — of both kinds — for a connection whose
    /// push channel dropped.
    pub async fn disconnect(&self, connection_id: &str) {
        if let Some(session) = self.shell_sessions.write().await.remove(connection_id) {
            session.close().await;
        }
        if let Some(session) = self.exec_sessions.write().await.remove(connection_id) {
            session.close().await;
        }
    }
}

pub(crate) fn chunk(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.chunks(CHUNK_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_zero_dimensions_to_defaults() {
        assert_eq!(clamp_size(0, 0), (DEFAULT_COLS, DEFAULT_ROWS));
        assert_eq!(clamp_size(80, 0), (80, DEFAULT_ROWS));
    }

    #[test]
    fn empty_command_defaults_to_sh() {
        assert_eq!(default_shell(""), "sh");
        assert_eq!(default_shell("   "), "sh");
        assert_eq!(default_shell("bash"), "bash");
    }
}
