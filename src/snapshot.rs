//! Dashboard read-model: one typed snapshot assembled from independently
//! written documents, degrading per slice instead of failing as a whole.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::documents::{
    paths, ActivityItem, ActivityType, CriticalTasksDocument, MemoryFilesDocument,
    OnboardingOverridesDocument, OnboardingTracker, StatsDocument, StatusDocument, TaskEntry,
    Telemetry,
};
use crate::onboarding::apply_overrides;
use crate::store::{from_fields, get_typed, DocumentStore, ListQuery, StoreError};
use crate::utils::{display_now, display_time};

pub const DEFAULT_ACTIVITY_LIMIT: usize = 20;

const FALLBACK_TITLE: &str = "Store Error";
const FALLBACK_DESCRIPTION: &str = "Could not connect to the document store";

/// Activity entry as displayed: the stored item plus a wall-clock label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityEntry {
    #[serde(flatten)]
    pub item: ActivityItem,
    pub time: String,
}

impl From<ActivityItem> for ActivityEntry {
    fn from(item: ActivityItem) -> Self {
        let time = display_time(&item.timestamp);
        Self { item, time }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub activity: Vec<ActivityEntry>,
    pub memory_files: Vec<String>,
    pub is_running_task: bool,
    pub current_task: Option<String>,
    pub telemetry: Option<Telemetry>,
    pub stats: StatsDocument,
    pub critical_tasks: Vec<TaskEntry>,
    pub onboarding: OnboardingTracker,
}

impl Snapshot {
    /// What the dashboard shows when the store cannot be reached at all.
    pub fn unreachable() -> Self {
        let item = ActivityItem::new(FALLBACK_TITLE, FALLBACK_DESCRIPTION, ActivityType::Error);
        Self {
            activity: vec![ActivityEntry {
                item,
                time: display_now(),
            }],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slice {
    Activity,
    MemoryFiles,
    Status,
    Stats,
    CriticalTasks,
    Onboarding,
    OnboardingOverrides,
}

impl Slice {
    const COUNT: usize = 7;

    pub fn as_str(&self) -> &'static str {
        match self {
            Slice::Activity => "activity",
            Slice::MemoryFiles => "memoryFiles",
            Slice::Status => "status",
            Slice::Stats => "stats",
            Slice::CriticalTasks => "criticalTasks",
            Slice::Onboarding => "onboarding",
            Slice::OnboardingOverrides => "onboardingOverrides",
        }
    }
}

/// A slice that was served from its fallback value.
#[derive(Debug, Clone, PartialEq)]
pub struct Degradation {
    pub slice: Slice,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub snapshot: Snapshot,
    pub degraded: Vec<Degradation>,
    /// The whole snapshot is the synthetic unreachable-store fallback.
    pub unreachable: bool,
}

impl SnapshotReport {
    fn unreachable() -> Self {
        Self {
            snapshot: Snapshot::unreachable(),
            degraded: Vec::new(),
            unreachable: true,
        }
    }

    /// Served entirely from live data.
    pub fn is_complete(&self) -> bool {
        !self.unreachable && self.degraded.is_empty()
    }
}

#[derive(Default)]
struct Settler {
    degraded: Vec<Degradation>,
    failures: usize,
}

impl Settler {
    fn settle<T: Default>(&mut self, slice: Slice, result: Result<T, StoreError>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(slice = slice.as_str(), error = %e, "Snapshot slice degraded to default");
                self.failures += 1;
                self.degraded.push(Degradation {
                    slice,
                    reason: e.to_string(),
                });
                T::default()
            }
        }
    }
}

pub struct SnapshotAggregator<'a> {
    store: &'a dyn DocumentStore,
    activity_limit: usize,
}

impl<'a> SnapshotAggregator<'a> {
    pub fn new(store: &'a dyn DocumentStore, activity_limit: usize) -> Self {
        Self {
            store,
            activity_limit,
        }
    }

    /// Build the snapshot. Never fails: unreadable slices fall back to their
    /// defaults, and an unreachable store yields the synthetic error snapshot.
    pub async fn collect(&self) -> SnapshotReport {
        if let Err(e) = self.store.ping().await {
            warn!(error = %e, "Document store unreachable, serving fallback snapshot");
            return SnapshotReport::unreachable();
        }

        let store = self.store;
        let (activity, memory, status, stats, tasks, tracker, overrides) = tokio::join!(
            self.fetch_activity(),
            fetch_or_default::<MemoryFilesDocument>(store, paths::MEMORY),
            fetch_or_default::<StatusDocument>(store, paths::STATUS),
            fetch_or_default::<StatsDocument>(store, paths::STATS),
            fetch_or_default::<CriticalTasksDocument>(store, paths::CRITICAL_TASKS),
            fetch_or_default::<OnboardingTracker>(store, paths::ONBOARDING),
            fetch_or_default::<OnboardingOverridesDocument>(store, paths::ONBOARDING_OVERRIDES),
        );

        let mut settler = Settler::default();
        let (activity, skipped) = settler.settle(Slice::Activity, activity);
        let memory = settler.settle(Slice::MemoryFiles, memory);
        let status = settler.settle(Slice::Status, status);
        let stats = settler.settle(Slice::Stats, stats);
        let tasks = settler.settle(Slice::CriticalTasks, tasks);
        let tracker = settler.settle(Slice::Onboarding, tracker);
        let overrides = settler.settle(Slice::OnboardingOverrides, overrides);

        if settler.failures == Slice::COUNT {
            warn!("Every snapshot read failed, serving fallback snapshot");
            return SnapshotReport::unreachable();
        }
        if skipped > 0 {
            settler.degraded.push(Degradation {
                slice: Slice::Activity,
                reason: format!("{skipped} malformed entries skipped"),
            });
        }

        let snapshot = Snapshot {
            activity,
            memory_files: memory.files,
            is_running_task: status.is_running,
            current_task: status.current_task,
            telemetry: status.telemetry,
            stats,
            critical_tasks: tasks.items,
            onboarding: apply_overrides(tracker, &overrides.done_items),
        };
        debug!(
            activity = snapshot.activity.len(),
            tasks = snapshot.critical_tasks.len(),
            degraded = settler.degraded.len(),
            "Snapshot assembled"
        );

        SnapshotReport {
            snapshot,
            degraded: settler.degraded,
            unreachable: false,
        }
    }

    /// Newest activity entries. Entries that don't decode are skipped and
    /// counted rather than failing the slice.
    async fn fetch_activity(&self) -> Result<(Vec<ActivityEntry>, usize), StoreError> {
        let items = self
            .store
            .list(
                paths::ACTIVITY_ITEMS,
                &ListQuery::newest_first("timestamp").limit(self.activity_limit),
            )
            .await?;

        let mut entries = Vec::with_capacity(items.len());
        let mut skipped = 0;
        for item in items {
            match from_fields::<ActivityItem>(paths::ACTIVITY_ITEMS, item.data) {
                Ok(activity) => entries.push(ActivityEntry::from(activity)),
                Err(e) => {
                    warn!(id = %item.id, error = %e, "Skipping malformed activity entry");
                    skipped += 1;
                }
            }
        }
        Ok((entries, skipped))
    }
}

async fn fetch_or_default<T: DeserializeOwned + Default>(
    store: &dyn DocumentStore,
    path: &str,
) -> Result<T, StoreError> {
    Ok(get_typed(store, path).await?.unwrap_or_default())
}
