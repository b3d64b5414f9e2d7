use tracing_subscriber::{fmt, EnvFilter};

/// Installs a `tracing` subscriber driven by `RUST_LOG`, defaulting to
/// `info` for this workspace's crates and `warn` elsewhere. Both the
/// controller and agent binaries call this once, first thing in `main`.
pub fn init_tracing(default_directives: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .init();
}
