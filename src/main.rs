//! scribed - collaborative editing coordination daemon.
//!
//! Coordinates concurrent editing sessions on writing projects: section
//! locks, version history, comments, activity, and realtime presence.

mod config;
mod db;
mod error;
mod http;
mod journal;
mod locks;
mod net;
mod persist;
mod protocol;
mod roles;
mod session;
mod state;
mod versions;

use crate::config::Config;
use crate::db::Database;
use crate::journal::Journal;
use crate::locks::LockManager;
use crate::net::Gateway;
use crate::persist::PersistHandle;
use crate::session::Broker;
use crate::state::hub::Hub;
use crate::versions::VersionStore;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    info!(server = %config.server.name, "Starting scribed");

    // Persistence is optional; without a [database] section the daemon runs
    // purely in memory.
    let (persist, db) = match &config.database {
        Some(database) => {
            let db = Database::new(&database.path).await?;
            let (handle, rx) = PersistHandle::channel();
            persist::spawn_writer(db.clone(), rx);
            (handle, Some(db))
        }
        None => {
            info!("No database configured; running in memory only");
            (PersistHandle::disabled(), None)
        }
    };

    let locks = LockManager::new(persist.clone());
    let versions = VersionStore::new(persist.clone());
    let journal = Journal::new(persist);

    // Hydrate in-memory state from the backing store before accepting
    // traffic, so rejoining clients see their history.
    if let Some(db) = &db {
        match db.locks().load_all().await {
            Ok(rows) => {
                info!(count = rows.len(), "Loaded section locks");
                locks.hydrate(rows);
            }
            Err(e) => warn!(error = %e, "Failed to load section locks"),
        }
        match db.versions().load_all().await {
            Ok(rows) => {
                info!(count = rows.len(), "Loaded project versions");
                versions.hydrate(rows);
            }
            Err(e) => warn!(error = %e, "Failed to load project versions"),
        }
        let comments = db.comments().load_all().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load comments");
            Vec::new()
        });
        let activity = db.activity().load_all().await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load activity");
            Vec::new()
        });
        info!(
            comments = comments.len(),
            activity = activity.len(),
            "Loaded journal"
        );
        journal.hydrate(comments, activity);
    }

    let broker = Arc::new(Broker::new(Hub::new(), locks, versions, journal));

    // Lock expiry sweep, independent of request traffic.
    {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(crate::locks::SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                broker.sweep_expired_locks().await;
            }
        });
    }
    info!("Lock sweep task started");

    // Request-style HTTP API.
    {
        let broker = Arc::clone(&broker);
        let addr = config.http.address;
        tokio::spawn(async move {
            if let Err(e) = http::run_http_server(addr, broker).await {
                error!(error = %e, "HTTP API server failed");
            }
        });
    }

    // Realtime WebSocket gateway.
    let gateway = Gateway::bind(config.listen.address, config.websocket, broker).await?;
    gateway.run().await?;

    Ok(())
}
