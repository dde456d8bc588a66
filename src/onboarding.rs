//! Onboarding overrides: dashboard users marking a synced onboarding step as
//! done before the Notion sync catches up.

use std::collections::HashSet;

use tracing::info;

use crate::documents::{paths, OnboardingOverridesDocument, OnboardingTracker};
use crate::store::{
    from_fields, to_fields, transactional_update, DocumentStore, StoreError, Update, WriteMode,
};
use crate::utils::now_iso;

pub const KEY_SEPARATOR: &str = "::";

#[derive(Debug, thiserror::Error)]
pub enum OnboardingError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("failed to update onboarding overrides: {0}")]
    StoreWriteFailed(#[from] StoreError),
}

pub fn composite_key(page_id: &str, task: &str) -> String {
    format!("{page_id}{KEY_SEPARATOR}{task}")
}

/// Mark (or unmark) one onboarding step as done. Idempotent both ways.
pub async fn set_onboarding_done(
    store: &dyn DocumentStore,
    page_id: &str,
    task: &str,
    done: bool,
) -> Result<(), OnboardingError> {
    let page_id = page_id.trim();
    let task = task.trim();
    if page_id.is_empty() || task.is_empty() {
        return Err(OnboardingError::InvalidPayload(
            "pageId and task are required".to_string(),
        ));
    }
    let key = composite_key(page_id, task);

    transactional_update(
        store,
        paths::ONBOARDING_OVERRIDES,
        WriteMode::Merge,
        |current| {
            let overrides: OnboardingOverridesDocument = match current {
                Some(fields) => from_fields(paths::ONBOARDING_OVERRIDES, fields.clone())?,
                None => OnboardingOverridesDocument::default(),
            };
            let next = OnboardingOverridesDocument {
                done_items: toggle(overrides.done_items, &key, done),
                last_updated: Some(now_iso()),
            };
            Ok::<_, OnboardingError>(Update::new(to_fields(&next)?, ()))
        },
    )
    .await?;

    info!(key = %key, done, "Onboarding override updated");
    Ok(())
}

/// Set union / removal of `key`, dropping duplicates while keeping the
/// first-seen order of the remaining entries.
fn toggle(items: Vec<String>, key: &str, done: bool) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut next: Vec<String> = items
        .into_iter()
        .filter(|item| done || item != key)
        .filter(|item| seen.insert(item.clone()))
        .collect();
    if done && !seen.contains(key) {
        next.push(key.to_string());
    }
    next
}

/// Hide steps users already marked done, adjusting the pending counts.
pub fn apply_overrides(mut tracker: OnboardingTracker, done_items: &[String]) -> OnboardingTracker {
    if done_items.is_empty() {
        return tracker;
    }
    let done: HashSet<&str> = done_items.iter().map(String::as_str).collect();

    let mut removed_total = 0;
    for entry in &mut tracker.items {
        let before = entry.open_items.len();
        let id = entry.id.clone();
        entry
            .open_items
            .retain(|step| !done.contains(composite_key(&id, step).as_str()));
        let removed = before - entry.open_items.len();
        entry.open_count = entry.open_count.saturating_sub(removed);
        removed_total += removed;
    }
    tracker.total_open = tracker.total_open.saturating_sub(removed_total);
    tracker
}
