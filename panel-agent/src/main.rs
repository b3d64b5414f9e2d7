mod identity;
mod proxy;
mod registry_client;

use std::net::SocketAddr;

use axum::routing::any;
use axum::{Json, Router};
use clap::Parser;
use panel_common::config::Config;
use panel_common::log::init_tracing;
use serde_json::json;

const DOCKER_SOCKET: &str = "/var/run/docker.sock";

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

async fn proxy_handler(req: hyper::Request<hyper::Body>) -> impl axum::response::IntoResponse {
    match proxy::handle(req, DOCKER_SOCKET.to_string()).await {
        Ok(resp) => resp,
        Err(infallible) => match infallible {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("panel_agent=info,panel_core=info,warn");
    let config = Config::parse();

    let name = identity::load_or_create_name(&config.data_path);
    tracing::info!(name = %name, port = config.port, "agent starting");

    let heartbeat_name = name.clone();
    let data_path = config.data_path.clone();
    let master_host = config.master_host.clone();
    let master_port = config.master_port;
    let agent_port = config.port;
    tokio::spawn(async move {
        registry_client::run(
            heartbeat_name,
            local_ip_guess(),
            agent_port,
            data_path,
            master_host,
            master_port,
        )
        .await;
    });

    let app = Router::new()
        .route("/healthz", any(healthz))
        .route(&format!("{}/*path", proxy::PROXY_PREFIX), any(proxy_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "agent listening");
    axum::Server::bind(&addr).serve(app.into_make_service()).await?;
    Ok(())
}

/// Best-effort local address used in the heartbeat body. Defaults to
/// loopback; set `PANEL_AGENT_ADDRESS` when the controller needs a
/// routable address to reach this agent at.
fn local_ip_guess() -> String {
    std::env::var("PANEL_AGENT_ADDRESS").unwrap_or_else(|_| "127.0.0.1".to_string())
}
