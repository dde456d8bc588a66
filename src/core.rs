use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, StoreBackend, StoreConfig};
use crate::dashboard::{self, DashboardState};
use crate::store::{DocumentStore, MemoryDocumentStore, SqliteDocumentStore};

/// Build the process-wide store client from config.
pub async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store: Arc<dyn DocumentStore> = match config.backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteDocumentStore::open(&config.db_path, &config.project_id)
                .await?
                .with_commit_attempts(config.max_attempts),
        ),
        StoreBackend::Memory => {
            info!("Using in-memory document store; nothing will be persisted");
            Arc::new(MemoryDocumentStore::new().with_commit_attempts(config.max_attempts))
        }
    };
    Ok(store)
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    // 1. Store
    let store = open_store(&config.store).await?;
    info!(
        backend = ?config.store.backend,
        project = %config.store.project_id,
        max_attempts = config.store.max_attempts,
        "Document store ready"
    );

    // 2. Dashboard
    if config.server.token.is_none() {
        info!("No server.token configured, dashboard API is unauthenticated");
    }
    let state = DashboardState {
        store,
        activity_limit: config.dashboard.activity_limit,
        dashboard_token: config.server.token.clone(),
    };

    // 3. Serve until ctrl-c
    info!("Starting opsdash v{}", env!("CARGO_PKG_VERSION"));
    dashboard::start_dashboard_server(state, config.server.port, &config.server.bind).await
}
