mod local;
mod ssh;

use std::collections::BTreeMap;
use std::path::Path;

use panel_common::error::{Error, ErrorKind, Result};
use panel_common::models::Node;
use tokio::io::{AsyncRead, AsyncWrite};

pub use local::LocalExec;
pub use ssh::SshExec;

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<String>,
}

pub type LineSink<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Capability to run commands and move files on a single host. A tagged
/// enum rather than a trait object: the variant is fixed once at
/// construction from `Node.is_local` and never changes for the node's
/// lifetime.
pub enum NodeExec {
    Local(LocalExec),
    Ssh(SshExec),
}

impl NodeExec {
    pub fn for_node(node: &Node, password: String) -> Self {
        if node.is_local {
            NodeExec::Local(LocalExec::new())
        } else {
            NodeExec::Ssh(SshExec::new(
                node.address.clone(),
                node.ssh_port,
                node.ssh_user.clone(),
                password,
            ))
        }
    }

    pub async fn init(&self) -> Result<()> {
        match self {
            NodeExec::Local(e) => e.init().await,
            NodeExec::Ssh(e) => e.init().await,
        }
    }

    pub async fn close(&self) -> Result<()> {
        match self {
            NodeExec::Local(e) => e.close().await,
            NodeExec::Ssh(e) => e.close().await,
        }
    }

    pub async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        match self {
            NodeExec::Local(e) => e.write_file(path, bytes).await,
            NodeExec::Ssh(e) => e.write_file(path, bytes).await,
        }
    }

    pub async fn write_file_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<()> {
        match self {
            NodeExec::Local(e) => e.write_file_stream(path, reader).await,
            NodeExec::Ssh(e) => e.write_file_stream(path, reader).await,
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        match self {
            NodeExec::Local(e) => e.read_file(path).await,
            NodeExec::Ssh(e) => e.read_file(path).await,
        }
    }

    pub async fn read_file_stream(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        match self {
            NodeExec::Local(e) => e.read_file_stream(path, writer).await,
            NodeExec::Ssh(e) => e.read_file_stream(path, writer).await,
        }
    }

    pub async fn mkdir_p(&self, path: &str) -> Result<()> {
        match self {
            NodeExec::Local(e) => e.mkdir_p(path).await,
            NodeExec::Ssh(e) => e.mkdir_p(path).await,
        }
    }

    pub async fn execute_output(&self, cmd: &str, opts: &ExecOptions) -> Result<(String, String)> {
        match self {
            NodeExec::Local(e) => e.execute_output(cmd, opts).await,
            NodeExec::Ssh(e) => e.execute_output(cmd, opts).await,
        }
    }

    pub async fn execute_command(
        &self,
        cmd: &str,
        opts: &ExecOptions,
        on_stdout: LineSink<'_>,
        on_stderr: LineSink<'_>,
    ) -> Result<()> {
        match self {
            NodeExec::Local(e) => e.execute_command(cmd, opts, on_stdout, on_stderr).await,
            NodeExec::Ssh(e) => e.execute_command(cmd, opts, on_stdout, on_stderr).await,
        }
    }
}

/// `export KEY=VAL` lines in lexicographic key order, for reproducible
/// command invocations.
pub(crate) fn env_lines(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter()
        .map(|(k, v)| format!("export {}='{}'", k, v.replace('\'', "'\\''")))
        .collect()
}

/// `export K='V'; ...` with single-quote escaping, for remote shells.
pub(crate) fn env_export_prefix(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(k, v)| format!("export {}='{}';", k, v.replace('\'', "'\\''")))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn exit_status_error(code: i32, stderr: &str) -> Error {
    let tail: String = stderr.chars().rev().take(4096).collect::<String>().chars().rev().collect();
    Error::from_kind(ErrorKind::CommandFailed { code, stderr: tail })
}

pub(crate) fn parent_dir(path: &str) -> Option<String> {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty())
}
