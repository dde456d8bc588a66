//! Typed shapes of the dashboard documents and where they live.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::utils::now_iso;

/// Fixed document paths.
pub mod paths {
    pub const STATUS: &str = "dashboard/status";
    pub const STATS: &str = "dashboard/stats";
    pub const MEMORY: &str = "dashboard/memory";
    pub const CRITICAL_TASKS: &str = "dashboard/critical_tasks";
    pub const ONBOARDING: &str = "dashboard/onboarding";
    pub const ONBOARDING_OVERRIDES: &str = "dashboard/onboarding_overrides";
    pub const ACTIVITY_ITEMS: &str = "dashboard/activity/items";
    pub const RESEARCH_ITEMS: &str = "dashboard/research/items";
}

/// Error for enum-valued inputs that arrive as free text (CLI args, payloads).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field} '{value}', expected one of: {expected}")]
pub struct InvalidValue {
    pub field: &'static str,
    pub value: String,
    pub expected: &'static str,
}

// ---------------------------------------------------------------------------
// Status / stats / memory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub current_task: Option<String>,
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

/// Runtime figures the heartbeat agent reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compactions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDocument {
    #[serde(default)]
    pub heartbeats_today: i64,
    #[serde(default)]
    pub pipeline: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryFilesDocument {
    #[serde(default)]
    pub files: Vec<String>,
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Heartbeat,
    Email,
    Website,
    Notion,
    Task,
    Error,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Heartbeat => "heartbeat",
            ActivityType::Email => "email",
            ActivityType::Website => "website",
            ActivityType::Notion => "notion",
            ActivityType::Task => "task",
            ActivityType::Error => "error",
        }
    }
}

impl FromStr for ActivityType {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heartbeat" => Ok(ActivityType::Heartbeat),
            "email" => Ok(ActivityType::Email),
            "website" => Ok(ActivityType::Website),
            "notion" => Ok(ActivityType::Notion),
            "task" => Ok(ActivityType::Task),
            "error" => Ok(ActivityType::Error),
            other => Err(InvalidValue {
                field: "activity type",
                value: other.to_string(),
                expected: "heartbeat, email, website, notion, task, error",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: ActivityType,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ActivityItem {
    /// New entry stamped with the current time.
    pub fn new(title: impl Into<String>, description: impl Into<String>, kind: ActivityType) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            kind,
            timestamp: now_iso(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchCategory {
    Partner,
    Competitor,
    Market,
    Courses,
}

impl FromStr for ResearchCategory {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "partner" => Ok(ResearchCategory::Partner),
            "competitor" => Ok(ResearchCategory::Competitor),
            "market" => Ok(ResearchCategory::Market),
            "courses" => Ok(ResearchCategory::Courses),
            other => Err(InvalidValue {
                field: "research category",
                value: other.to_string(),
                expected: "partner, competitor, market, courses",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    Researching,
    Completed,
    Pending,
}

impl FromStr for ResearchStatus {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "researching" => Ok(ResearchStatus::Researching),
            "completed" => Ok(ResearchStatus::Completed),
            "pending" => Ok(ResearchStatus::Pending),
            other => Err(InvalidValue {
                field: "research status",
                value: other.to_string(),
                expected: "researching, completed, pending",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: ResearchCategory,
    pub status: ResearchStatus,
    #[serde(default)]
    pub updated_at: String,
}

/// A research item as read back, carrying its store id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResearchRecord {
    pub id: String,
    #[serde(flatten)]
    pub item: ResearchItem,
}

// ---------------------------------------------------------------------------
// Critical tasks
// ---------------------------------------------------------------------------

/// Task state. Values written by other tools that we don't recognise are
/// carried through untouched and count as open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Open,
    Blocked,
    Done,
    Canceled,
    Other(String),
}

impl TaskStatus {
    /// Done and canceled tasks no longer count towards `openCount`.
    pub fn is_closed(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Canceled)
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Canceled => "canceled",
            TaskStatus::Other(s) => s,
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "open" => TaskStatus::Open,
            "blocked" => TaskStatus::Blocked,
            "done" => TaskStatus::Done,
            "canceled" => TaskStatus::Canceled,
            _ => TaskStatus::Other(s),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who owes whom. Unrecognised values are kept as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskDirection {
    IOwe,
    OweMe,
    Other(String),
}

impl From<String> for TaskDirection {
    fn from(s: String) -> Self {
        match s.as_str() {
            "i_owe" => TaskDirection::IOwe,
            "owe_me" => TaskDirection::OweMe,
            _ => TaskDirection::Other(s),
        }
    }
}

impl From<TaskDirection> for String {
    fn from(direction: TaskDirection) -> Self {
        match direction {
            TaskDirection::IOwe => "i_owe".to_string(),
            TaskDirection::OweMe => "owe_me".to_string(),
            TaskDirection::Other(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalTask {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TaskDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Fields written by the syncing agent that this crate does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CriticalTask {
    pub fn is_open(&self) -> bool {
        !self.status.as_ref().is_some_and(TaskStatus::is_closed)
    }
}

/// One entry of the synced task list. Items that don't decode as a
/// [`CriticalTask`] (numeric or missing ids, odd field types) stay raw JSON
/// and are written back exactly as read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskEntry {
    Task(CriticalTask),
    Raw(Value),
}

impl TaskEntry {
    /// The id in text form. Numbers and booleans are stringified.
    pub fn id(&self) -> Option<String> {
        match self {
            TaskEntry::Task(task) => Some(task.id.clone()),
            TaskEntry::Raw(value) => value.get("id").and_then(id_text),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            TaskEntry::Task(task) => task.is_open(),
            TaskEntry::Raw(value) => !value
                .get("status")
                .and_then(Value::as_str)
                .is_some_and(|s| TaskStatus::from(s.to_string()).is_closed()),
        }
    }

    /// Set the status and stamp `updatedAt`. Raw entries that aren't objects
    /// have no id to match on and are left alone.
    pub fn set_status(&mut self, status: TaskStatus, now: &str) {
        match self {
            TaskEntry::Task(task) => {
                task.status = Some(status);
                task.updated_at = Some(now.to_string());
            }
            TaskEntry::Raw(Value::Object(map)) => {
                map.insert("status".into(), Value::String(status.into()));
                map.insert("updatedAt".into(), Value::String(now.to_string()));
            }
            TaskEntry::Raw(_) => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalTasksDocument {
    #[serde(default, deserialize_with = "lenient_list")]
    pub items: Vec<TaskEntry>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub open_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}

impl CriticalTasksDocument {
    pub fn count_open(items: &[TaskEntry]) -> usize {
        items.iter().filter(|t| t.is_open()).count()
    }

    /// Recompute `open_count` from the full list.
    pub fn recount(&mut self) {
        self.open_count = Self::count_open(&self.items);
    }
}

// ---------------------------------------------------------------------------
// Onboarding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingOverridesDocument {
    #[serde(default, deserialize_with = "lenient_list")]
    pub done_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Per-employee onboarding progress as synced from Notion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingEntry {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_count")]
    pub open_count: usize,
    #[serde(default, deserialize_with = "lenient_list")]
    pub open_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingTracker {
    #[serde(default, deserialize_with = "lenient_list")]
    pub items: Vec<OnboardingEntry>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_open: usize,
}

// ---------------------------------------------------------------------------
// Lenient field decoding
// ---------------------------------------------------------------------------
//
// The task and onboarding documents are written by sync agents outside this
// crate. One odd field should not make the whole document unreadable.

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Non-arrays read as empty. Elements that don't decode are dropped.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0))
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(id_text(&Value::deserialize(deserializer)?).unwrap_or_default())
}
