use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use panel_core::session::{PushEvent, PushSender};
use serde::{Deserialize, Serialize};

use super::AppState;

/// Client → server RPCs carried as JSON text frames over the push
/// channel, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ClientRpc {
    StartShell { connection_id: String, node_id: i64, cols: u16, rows: u16 },
    StopShell { connection_id: String },
    WriteShell { connection_id: String, data: String },
    ResizeShell { connection_id: String, cols: u16, rows: u16 },
    StartExec { connection_id: String, node_id: i64, container_id: String, command: String },
    StopExec { connection_id: String },
    WriteExec { connection_id: String, data: String },
    ResizeExec { connection_id: String, cols: u16, rows: u16 },
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum ServerEvent<'a> {
    SshData { connection_id: &'a str, data: String },
    DockerExecData { connection_id: &'a str, data: String },
    Error { connection_id: &'a str, message: &'a str },
}

pub async fn upgrade(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PushEvent>();
    let push = PushSender::new(tx);

    let seen_connection_ids: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
    let hub_for_cleanup = state.session_hub.clone();
    let seen_for_cleanup = seen_connection_ids.clone();

    let writer_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match &event {
                PushEvent::SshData { connection_id, data } => ServerEvent::SshData {
                    connection_id: connection_id.as_str(),
                    data: String::from_utf8_lossy(data).into_owned(),
                },
                PushEvent::DockerExecData { connection_id, data } => ServerEvent::DockerExecData {
                    connection_id: connection_id.as_str(),
                    data: String::from_utf8_lossy(data).into_owned(),
                },
                PushEvent::Error { connection_id, message } => {
                    ServerEvent::Error { connection_id: connection_id.as_str(), message: message.as_str() }
                }
            };
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        let rpc: ClientRpc = match serde_json::from_str(&text) {
            Ok(rpc) => rpc,
            Err(e) => {
                tracing::warn!(error = %e, "malformed session rpc frame");
                continue;
            }
        };
        dispatch(&state, rpc, &push, &seen_connection_ids).await;
    }

    let ids: Vec<String> = seen_for_cleanup.lock().unwrap().drain().collect();
    for connection_id in ids {
        hub_for_cleanup.disconnect(&connection_id).await;
    }
    writer_task.abort();
}

async fn dispatch(state: &Arc<AppState>, rpc: ClientRpc, push: &PushSender, seen: &Arc<Mutex<HashSet<String>>>) {
    let hub = &state.session_hub;
    let result = match rpc {
        ClientRpc::StartShell { connection_id, node_id, cols, rows } => {
            seen.lock().unwrap().insert(connection_id.clone());
            hub.start_shell(connection_id, node_id, cols, rows, push.clone()).await
        }
        ClientRpc::StopShell { connection_id } => hub.stop_shell(&connection_id).await,
        ClientRpc::WriteShell { connection_id, data } => hub.write_shell(&connection_id, data.as_bytes()).await,
        ClientRpc::ResizeShell { connection_id, cols, rows } => hub.resize_shell(&connection_id, cols, rows).await,
        ClientRpc::StartExec { connection_id, node_id, container_id, command } => {
            seen.lock().unwrap().insert(connection_id.clone());
            hub.start_exec(connection_id, node_id, container_id, command, push.clone()).await
        }
        ClientRpc::StopExec { connection_id } => hub.stop_exec(&connection_id).await,
        ClientRpc::WriteExec { connection_id, data } => hub.write_exec(&connection_id, data.as_bytes()).await,
        ClientRpc::ResizeExec { connection_id, cols, rows } => hub.resize_exec(&connection_id, cols, rows).await,
    };
    if let Err(e) = result {
        push.send(PushEvent::Error { connection_id: String::new(), message: e.to_string() }).await;
    }
}
