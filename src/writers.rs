//! Single-round-trip writers used by the heartbeat agent (through the CLI)
//! and the research read used by the dashboard.

use tracing::{info, warn};

use crate::documents::{
    paths, ActivityItem, ActivityType, MemoryFilesDocument, ResearchCategory, ResearchItem,
    ResearchRecord, ResearchStatus, StatsDocument, StatusDocument, Telemetry,
};
use crate::store::{from_fields, to_fields, DocumentStore, ListQuery, StoreError};
use crate::utils::now_iso;

/// Append an activity entry stamped with the current time. Returns its id.
pub async fn write_activity(
    store: &dyn DocumentStore,
    title: &str,
    description: &str,
    kind: ActivityType,
) -> Result<String, StoreError> {
    let item = ActivityItem::new(title, description, kind);
    let id = store.add(paths::ACTIVITY_ITEMS, to_fields(&item)?).await?;
    info!(id = %id, kind = kind.as_str(), "Activity written");
    Ok(id)
}

/// Overwrite the agent status document.
pub async fn update_status(
    store: &dyn DocumentStore,
    is_running: bool,
    current_task: Option<&str>,
    telemetry: Option<Telemetry>,
) -> Result<(), StoreError> {
    let status = StatusDocument {
        is_running,
        current_task: current_task.map(str::to_string),
        telemetry,
        last_update: Some(now_iso()),
    };
    store.set(paths::STATUS, to_fields(&status)?).await?;
    info!(is_running, "Status updated");
    Ok(())
}

pub async fn update_stats(
    store: &dyn DocumentStore,
    heartbeats_today: i64,
    pipeline: i64,
) -> Result<(), StoreError> {
    let stats = StatsDocument {
        heartbeats_today,
        pipeline,
        last_update: Some(now_iso()),
    };
    store.set(paths::STATS, to_fields(&stats)?).await?;
    info!(heartbeats_today, pipeline, "Stats updated");
    Ok(())
}

/// Add a research note. Returns its id.
pub async fn write_research(
    store: &dyn DocumentStore,
    title: &str,
    description: &str,
    category: ResearchCategory,
    status: ResearchStatus,
) -> Result<String, StoreError> {
    let item = ResearchItem {
        title: title.to_string(),
        description: description.to_string(),
        category,
        status,
        updated_at: now_iso(),
    };
    let id = store.add(paths::RESEARCH_ITEMS, to_fields(&item)?).await?;
    info!(id = %id, "Research item written");
    Ok(id)
}

/// Research notes, most recently updated first. Entries that don't decode
/// are left out.
pub async fn get_research(store: &dyn DocumentStore) -> Result<Vec<ResearchRecord>, StoreError> {
    let items = store
        .list(paths::RESEARCH_ITEMS, &ListQuery::newest_first("updatedAt"))
        .await?;

    Ok(items
        .into_iter()
        .filter_map(
            |entry| match from_fields::<ResearchItem>(paths::RESEARCH_ITEMS, entry.data) {
                Ok(item) => Some(ResearchRecord { id: entry.id, item }),
                Err(e) => {
                    warn!(id = %entry.id, error = %e, "Skipping malformed research item");
                    None
                }
            },
        )
        .collect())
}

/// Replace the memory-file label list.
pub async fn update_memory_files(
    store: &dyn DocumentStore,
    files: Vec<String>,
) -> Result<(), StoreError> {
    let count = files.len();
    store
        .set(paths::MEMORY, to_fields(&MemoryFilesDocument { files })?)
        .await?;
    info!(count, "Memory files updated");
    Ok(())
}
