mod api;
mod persistence;
mod registry;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use panel_common::config::Config;
use panel_common::log::init_tracing;
use panel_core::crypto::Encryptor;
use panel_core::reconciler::ServiceStateReconciler;
use panel_core::session::SessionHub;
use panel_core::state::NodeManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("panel_controller=info,panel_core=info,warn");
    let config = Arc::new(Config::parse());

    let db_path = format!("{}/panel.db", config.data_path.trim_end_matches('/'));
    tokio::fs::create_dir_all(&config.data_path).await?;
    let pool = persistence::connect(&db_path).await?;

    let nodes: Arc<dyn panel_common::repo::NodeRepository> = Arc::new(persistence::SqliteNodeRepository::new(pool.clone()));
    let apps: Arc<dyn panel_common::repo::AppRepository> = Arc::new(persistence::SqliteAppRepository::new(pool.clone()));
    let services: Arc<dyn panel_common::repo::ServiceRepository> =
        Arc::new(persistence::SqliteServiceRepository::new(pool.clone()));
    let env: Arc<dyn panel_common::repo::EnvRepository> = Arc::new(persistence::SqliteEnvRepository::new(pool.clone()));
    let kv: Arc<dyn panel_common::repo::KvRepository> = Arc::new(persistence::SqliteKvRepository::new(pool.clone()));

    let encryptor = Arc::new(Encryptor::new(config.encryption_key_bytes()));
    let node_manager = Arc::new(NodeManager::new(nodes.clone(), encryptor));
    let session_hub = Arc::new(SessionHub::new(node_manager.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let reconciler = ServiceStateReconciler::new(services.clone(), node_manager.clone());
    tokio::spawn(reconciler.run(shutdown_rx.clone()));

    let health_loop = registry::HealthLoop::new(nodes.clone(), node_manager.clone(), config.clone());
    tokio::spawn(health_loop.run(shutdown_rx.clone()));

    let state = Arc::new(api::AppState {
        config: config.clone(),
        nodes,
        apps,
        services,
        env,
        kv,
        node_manager,
        session_hub,
    });

    let app = api::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "controller listening");

    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let graceful = server.with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    if let Err(e) = graceful.await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
    Ok(())
}
