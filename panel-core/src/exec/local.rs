use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;

use panel_common::error::Result;

use super::{env_lines, exit_status_error, parent_dir, ExecOptions, LineSink};

/// `NodeExec` variant for the controller's own host (or an agent running
/// on the node it manages).
pub struct LocalExec;

impl LocalExec {
    pub fn new() -> Self {
        Self
    }

    fn shell() -> String {
        if cfg!(windows) {
            "powershell.exe".to_string()
        } else {
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
        }
    }

    pub async fn init(&self) -> Result<()> {
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        Ok(())
    }

    pub async fn write_file(&self, path: &str, bytes: &[u8]) -> Result<()> {
        if let Some(dir) = parent_dir(path) {
            fs::create_dir_all(&dir).await?;
        }
        fs::write(path, bytes).await?;
        Ok(())
    }

    pub async fn write_file_stream(
        &self,
        path: &str,
        reader: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<()> {
        if let Some(dir) = parent_dir(path) {
            fs::create_dir_all(&dir).await?;
        }
        let mut file = fs::File::create(path).await?;
        tokio::io::copy(reader, &mut file).await?;
        Ok(())
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        Ok(fs::read(path).await?)
    }

    pub async fn read_file_stream(
        &self,
        path: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<()> {
        let mut file = fs::File::open(path).await?;
        tokio::io::copy(&mut file, writer).await?;
        Ok(())
    }

    pub async fn mkdir_p(&self, path: &str) -> Result<()> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    pub async fn execute_output(&self, cmd: &str, opts: &ExecOptions) -> Result<(String, String)> {
        let output = self.build_command(cmd, opts).output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(exit_status_error(output.status.code().unwrap_or(-1), &stderr));
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
        let mut child = self
            .build_command(cmd, opts)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let mut stderr_tail = String::new();

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    match line? {
                        Some(l) => on_stdout(&l),
                        None => break,
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Some(l) = line? {
                        stderr_tail.push_str(&l);
                        stderr_tail.push('\n');
                        on_stderr(&l);
                    }
                }
            }
        }
        // drain any remaining stderr after stdout closes
        while let Some(l) = stderr_lines.next_line().await? {
            stderr_tail.push_str(&l);
            stderr_tail.push('\n');
            on_stderr(&l);
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(exit_status_error(status.code().unwrap_or(-1), &stderr_tail));
        }
        Ok(())
    }

    fn build_command(&self, cmd: &str, opts: &ExecOptions) -> Command {
        let full = if opts.env.is_empty() {
            cmd.to_string()
        } else {
            format!("{}\n{}", env_lines(&opts.env).join("\n"), cmd)
        };
        let mut command = Command::new(Self::shell());
        if cfg!(windows) {
            command.arg("-Command").arg(full);
        } else {
            command.arg("-c").arg(full);
        }
        if let Some(dir) = &opts.working_dir {
            command.current_dir(dir);
        }
        command
    }
}
