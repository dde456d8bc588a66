//! Critical-task actions triggered from the dashboard.

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::documents::{paths, ActivityItem, ActivityType, CriticalTasksDocument, TaskStatus};
use crate::store::{
    from_fields, to_fields, transactional_update, DocumentStore, StoreError, Update, WriteMode,
};
use crate::utils::now_iso;

/// `source` stamped on activity entries produced by dashboard actions.
pub const DASHBOARD_SOURCE: &str = "dashboard-ui";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    Complete,
    Cancel,
}

impl TaskAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskAction::Complete => "complete",
            TaskAction::Cancel => "cancel",
        }
    }

    fn target_status(self) -> TaskStatus {
        match self {
            TaskAction::Complete => TaskStatus::Done,
            TaskAction::Cancel => TaskStatus::Canceled,
        }
    }

    fn activity_title(self) -> &'static str {
        match self {
            TaskAction::Complete => "Task completed",
            TaskAction::Cancel => "Task canceled",
        }
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskAction {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "complete" => Ok(TaskAction::Complete),
            "cancel" => Ok(TaskAction::Cancel),
            other => Err(TaskError::InvalidPayload(format!(
                "unknown action '{other}', use complete|cancel"
            ))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("failed to update critical tasks: {0}")]
    StoreWriteFailed(#[from] StoreError),
}

/// Close one critical task and log the action to the activity feed.
///
/// The list update and the activity entry commit together, conditional on the
/// list not having changed since it was read. `openCount` is always recomputed
/// from the resulting list.
pub async fn apply_task_action(
    store: &dyn DocumentStore,
    task_id: &str,
    action: TaskAction,
) -> Result<(), TaskError> {
    let task_id = task_id.trim();
    if task_id.is_empty() {
        return Err(TaskError::InvalidPayload("task id is required".to_string()));
    }

    let open_count = transactional_update(
        store,
        paths::CRITICAL_TASKS,
        WriteMode::Merge,
        |current| {
            let mut doc: CriticalTasksDocument = match current {
                Some(fields) => from_fields(paths::CRITICAL_TASKS, fields.clone())?,
                None => CriticalTasksDocument::default(),
            };

            let now = now_iso();
            let task = doc
                .items
                .iter_mut()
                .find(|t| t.id().as_deref() == Some(task_id))
                .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
            task.set_status(action.target_status(), &now);

            doc.recount();
            doc.last_sync = Some(now);

            let entry = ActivityItem::new(action.activity_title(), task_id, ActivityType::Task)
                .with_source(DASHBOARD_SOURCE);
            Ok::<_, TaskError>(
                Update::new(to_fields(&doc)?, doc.open_count)
                    .with_append(paths::ACTIVITY_ITEMS, to_fields(&entry)?),
            )
        },
    )
    .await?;

    info!(task_id, action = %action, open_count, "Critical task updated");
    Ok(())
}
