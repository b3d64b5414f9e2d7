use std::time::Duration;

use serde::Serialize;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct RegistryRequest<'a> {
    name: &'a str,
    address: &'a str,
    agent_port: u16,
    is_local: bool,
    status: &'static str,
    data_path: &'a str,
}

/// Sends this agent's heartbeat to the controller once immediately, then
/// every 30 seconds for the lifetime of the process.
pub async fn run(
    name: String,
    address: String,
    agent_port: u16,
    data_path: String,
    master_host: String,
    master_port: u16,
) {
    let client = reqwest::Client::new();
    let url = format!("http://{master_host}:{master_port}/registry");
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        interval.tick().await;
        let body = RegistryRequest {
            name: &name,
            address: &address,
            agent_port,
            is_local: false,
            status: "online",
            data_path: &data_path,
        };
        match client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::debug!(name = %name, "heartbeat sent");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "controller rejected heartbeat");
            }
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat request failed, will retry next tick");
            }
        }
    }
}
