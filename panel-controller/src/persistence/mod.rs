mod app_repo;
mod env_repo;
mod kv_repo;
mod node_repo;
mod service_repo;

use panel_common::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

pub use app_repo::SqliteAppRepository;
pub use env_repo::SqliteEnvRepository;
pub use kv_repo::SqliteKvRepository;
pub use node_repo::SqliteNodeRepository;
pub use service_repo::SqliteServiceRepository;

/// Opens (creating if absent) the SQLite database at `path`, turns on
/// WAL mode and foreign keys, and applies the ad hoc
/// `CREATE TABLE IF NOT EXISTS` schema inline rather than through a
/// separate migrations runner.
pub async fn connect(path: &str) -> Result<SqlitePool> {
    let options = if path == ":memory:" {
        SqliteConnectOptions::from_str("sqlite::memory:")?
    } else {
        SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?.create_if_missing(true)
    }
    .foreign_keys(true)
    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let max_connections = if path == ":memory:" { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    run_schema(&pool).await?;
    Ok(pool)
}

async fn run_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            address TEXT NOT NULL,
            agent_port INTEGER NOT NULL,
            ssh_port INTEGER NOT NULL,
            ssh_user TEXT NOT NULL,
            ssh_password_enc BLOB NOT NULL,
            is_local INTEGER NOT NULL,
            status TEXT NOT NULL,
            data_path TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS apps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            display TEXT NOT NULL,
            description TEXT NOT NULL,
            icon TEXT NOT NULL,
            docker_compose TEXT,
            qa TEXT NOT NULL,
            metadata TEXT NOT NULL,
            static_path TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS services (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            app_id INTEGER NOT NULL REFERENCES apps(id),
            node_id INTEGER NOT NULL REFERENCES nodes(id),
            status TEXT NOT NULL,
            qa_values TEXT NOT NULL,
            deploy_info TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS env (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            value TEXT NOT NULL,
            scope TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            value TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
