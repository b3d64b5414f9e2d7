use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Controller,
    Agent,
}

/// Process configuration, parsed once at start-up from CLI args with
/// environment-variable fallbacks, then handed down as `Arc<Config>`
/// instead of re-read piecemeal.
#[derive(Debug, Clone, Parser)]
#[command(author, version, about)]
pub struct Config {
    #[arg(value_enum)]
    pub role: Role,

    /// Port this process listens on.
    #[arg(long, env = "PANEL_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Hostname/IP the agent uses to reach the controller.
    #[arg(long, env = "PANEL_MASTER_HOST", default_value = "127.0.0.1")]
    pub master_host: String,

    /// Port the agent uses to reach the controller.
    #[arg(long, env = "PANEL_MASTER_PORT", default_value_t = 8000)]
    pub master_port: u16,

    /// Root directory for this node's persisted workspace and identity.
    #[arg(long, env = "PANEL_DATA_PATH", default_value = "./data")]
    pub data_path: String,

    /// 32-byte (or shorter, zero-padded) key material for SSH password
    /// encryption at rest.
    #[arg(long, env = "LAI_PANEL_ENCRYPTION_KEY")]
    pub encryption_key: Option<String>,

    /// Path to the agent binary the controller pushes during bootstrap.
    #[arg(long, env = "PANEL_AGENT_BINARY_PATH", default_value = "./panel-agent")]
    pub agent_binary_path: String,

    /// Path to the install script the controller pushes during bootstrap.
    #[arg(long, env = "PANEL_INSTALL_SCRIPT_PATH", default_value = "./install.sh")]
    pub install_script_path: String,
}

impl Config {
    pub fn is_agent(&self) -> bool {
        matches!(self.role, Role::Agent)
    }

    /// Encryption key material normalised to exactly 32 bytes: truncated
    /// or zero-padded, never panics on a short or absent value.
    pub fn encryption_key_bytes(&self) -> [u8; 32] {
        let mut key = [0u8; 32];
        if let Some(raw) = &self.encryption_key {
            let bytes = raw.as_bytes();
            let n = bytes.len().min(32);
            key[..n].copy_from_slice(&bytes[..n]);
        }
        key
    }
}
