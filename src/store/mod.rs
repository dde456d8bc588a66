//! Document store client: path-addressed JSON documents plus append-only
//! subcollections, with a revision-checked commit used for read-modify-write.

mod memory;
mod sqlite;

pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use std::cmp::Ordering;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Top-level fields of a document. Documents are always JSON objects.
pub type Fields = Map<String, Value>;

/// Attempts `transactional_update` makes before giving up on a contended document.
pub const DEFAULT_COMMIT_ATTEMPTS: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Raised by test doubles standing in for an unreachable backend.
    #[cfg_attr(not(test), allow(dead_code))]
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed document at {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode document: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("write contention on {path}: gave up after {attempts} attempts")]
    Contention { path: String, attempts: u32 },
}

/// A document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument {
    pub data: Fields,
    pub revision: i64,
}

/// One entry of a subcollection, with its store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionItem {
    pub id: String,
    pub data: Fields,
}

/// Ordering and cap for a subcollection listing.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub order_by: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn newest_first(field: &str) -> Self {
        Self {
            order_by: Some(field.to_string()),
            descending: true,
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// State the target document must be in for a conditional write to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// The document must not exist yet.
    Missing,
    /// The document must still be at this revision.
    Revision(i64),
}

/// A document write guarded by a precondition, plus subcollection appends that
/// commit in the same unit.
#[derive(Debug, Clone)]
pub struct ConditionalWrite {
    pub path: String,
    pub data: Fields,
    pub precondition: Precondition,
    pub appends: Vec<(String, Fields)>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Cheap liveness probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Read a document. `Ok(None)` when it has never been written.
    async fn get(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError>;

    /// Overwrite a document wholesale (last-write-wins, no revision check).
    async fn set(&self, path: &str, data: Fields) -> Result<(), StoreError>;

    /// Append to a subcollection. Returns the assigned id.
    async fn add(&self, collection: &str, data: Fields) -> Result<String, StoreError>;

    /// List a subcollection.
    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> Result<Vec<CollectionItem>, StoreError>;

    /// Apply `write` only if its precondition holds. Returns `false` on a
    /// revision conflict, in which case nothing was written.
    async fn commit(&self, write: ConditionalWrite) -> Result<bool, StoreError>;

    /// Attempts `transactional_update` makes against this store.
    fn commit_attempts(&self) -> u32 {
        DEFAULT_COMMIT_ATTEMPTS
    }
}

/// How a mutation's output is combined with the stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the document.
    #[cfg_attr(not(test), allow(dead_code))]
    Overwrite,
    /// Replace only the top-level fields the mutation produced.
    Merge,
}

/// Result of a mutation closure: the fields to write, appends committed
/// alongside, and a value handed back to the caller.
#[derive(Debug)]
pub struct Update<T> {
    pub fields: Fields,
    pub appends: Vec<(String, Fields)>,
    pub output: T,
}

impl<T> Update<T> {
    pub fn new(fields: Fields, output: T) -> Self {
        Self {
            fields,
            appends: Vec::new(),
            output,
        }
    }

    pub fn with_append(mut self, collection: &str, data: Fields) -> Self {
        self.appends.push((collection.to_string(), data));
        self
    }
}

/// Read-modify-write of one document as a compare-and-set on its revision.
///
/// `mutate` sees the current fields (`None` if the document does not exist) and
/// must be a pure function of them: on a conflict it is called again with the
/// fresh document. Returning `Err` aborts without writing anything.
pub async fn transactional_update<T, E, F>(
    store: &dyn DocumentStore,
    path: &str,
    mode: WriteMode,
    mut mutate: F,
) -> Result<T, E>
where
    F: FnMut(Option<&Fields>) -> Result<Update<T>, E>,
    E: From<StoreError>,
{
    let attempts = store.commit_attempts().max(1);
    for attempt in 1..=attempts {
        let current = store.get(path).await?;
        let update = mutate(current.as_ref().map(|doc| &doc.data))?;

        let (data, precondition) = match current {
            Some(doc) => {
                let data = match mode {
                    WriteMode::Overwrite => update.fields,
                    WriteMode::Merge => merge_fields(doc.data, update.fields),
                };
                (data, Precondition::Revision(doc.revision))
            }
            None => (update.fields, Precondition::Missing),
        };

        let write = ConditionalWrite {
            path: path.to_string(),
            data,
            precondition,
            appends: update.appends,
        };
        if store.commit(write).await? {
            debug!(path, attempt, "Conditional commit applied");
            return Ok(update.output);
        }
        warn!(path, attempt, "Document changed underneath update, retrying");
    }

    Err(StoreError::Contention {
        path: path.to_string(),
        attempts,
    }
    .into())
}

/// Shallow merge: every top-level key of `patch` replaces the one in `base`.
pub fn merge_fields(mut base: Fields, patch: Fields) -> Fields {
    for (key, value) in patch {
        base.insert(key, value);
    }
    base
}

/// Read a document and decode it. Missing documents decode to `None`.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    path: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(path).await? {
        Some(doc) => from_fields(path, doc.data).map(Some),
        None => Ok(None),
    }
}

pub fn from_fields<T: DeserializeOwned>(path: &str, fields: Fields) -> Result<T, StoreError> {
    serde_json::from_value(Value::Object(fields)).map_err(|source| StoreError::Malformed {
        path: path.to_string(),
        source,
    })
}

pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Encode(<serde_json::Error as serde::ser::Error>::custom(
            format!("expected a JSON object, got {other}"),
        ))),
    }
}

/// Ordering used by in-process listings; mirrors SQLite's `json_extract`
/// ordering closely enough for the timestamp and number fields we sort on.
pub(crate) fn compare_field(a: &Fields, b: &Fields, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        // Numbers sort before text, as in SQLite.
        (Some(Value::Number(_)), _) => Ordering::Less,
        (_, Some(Value::Number(_))) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fields;
    use serde_json::json;

    #[tokio::test]
    async fn plain_read_modify_write_loses_concurrent_update() {
        let store = MemoryDocumentStore::new();
        store
            .set("dashboard/counter", fields(json!({"a": 0, "b": 0})))
            .await
            .unwrap();

        // Two clients read the same revision, then each overwrites.
        let first = store.get("dashboard/counter").await.unwrap().unwrap();
        let second = store.get("dashboard/counter").await.unwrap().unwrap();

        let mut a = first.data.clone();
        a.insert("a".into(), json!(1));
        store.set("dashboard/counter", a).await.unwrap();

        let mut b = second.data.clone();
        b.insert("b".into(), json!(1));
        store.set("dashboard/counter", b).await.unwrap();

        let stored = store.get("dashboard/counter").await.unwrap().unwrap();
        assert_eq!(stored.data["a"], json!(0), "first writer's change was lost");
        assert_eq!(stored.data["b"], json!(1));
    }

    #[tokio::test]
    async fn stale_conditional_commit_is_rejected() {
        let store = MemoryDocumentStore::new();
        store
            .set("dashboard/doc", fields(json!({"v": 1})))
            .await
            .unwrap();
        let stale = store.get("dashboard/doc").await.unwrap().unwrap();
        store
            .set("dashboard/doc", fields(json!({"v": 2})))
            .await
            .unwrap();

        let applied = store
            .commit(ConditionalWrite {
                path: "dashboard/doc".into(),
                data: fields(json!({"v": 3})),
                precondition: Precondition::Revision(stale.revision),
                appends: vec![("dashboard/log/items".into(), fields(json!({"n": 1})))],
            })
            .await
            .unwrap();

        assert!(!applied);
        let stored = store.get("dashboard/doc").await.unwrap().unwrap();
        assert_eq!(stored.data["v"], json!(2));
        let log = store
            .list("dashboard/log/items", &ListQuery::default())
            .await
            .unwrap();
        assert!(log.is_empty(), "appends must not land when the commit fails");
    }

    #[tokio::test]
    async fn transactional_update_merges_and_keeps_unrelated_fields() {
        let store = MemoryDocumentStore::new();
        store
            .set("dashboard/doc", fields(json!({"keep": "me", "n": 1})))
            .await
            .unwrap();

        let seen = transactional_update(&store, "dashboard/doc", WriteMode::Merge, |current| {
            let n = current.and_then(|f| f["n"].as_i64()).unwrap_or(0);
            Ok::<_, StoreError>(Update::new(fields(json!({"n": n + 1})), n))
        })
        .await
        .unwrap();

        assert_eq!(seen, 1);
        let stored = store.get("dashboard/doc").await.unwrap().unwrap();
        assert_eq!(stored.data["keep"], json!("me"));
        assert_eq!(stored.data["n"], json!(2));
    }

    #[tokio::test]
    async fn overwrite_mode_replaces_the_whole_document() {
        let store = MemoryDocumentStore::new();
        store
            .set("dashboard/doc", fields(json!({"keep": "me", "n": 1})))
            .await
            .unwrap();

        transactional_update(&store, "dashboard/doc", WriteMode::Overwrite, |_| {
            Ok::<_, StoreError>(Update::new(fields(json!({"n": 2})), ()))
        })
        .await
        .unwrap();

        let stored = store.get("dashboard/doc").await.unwrap().unwrap();
        assert_eq!(stored.data, fields(json!({"n": 2})));
    }

    #[tokio::test]
    async fn transactional_update_retries_after_interleaved_write() {
        let store = crate::testing::InterferingStore::new(
            MemoryDocumentStore::new(),
            "dashboard/doc",
            fields(json!({"other": true, "n": 10})),
        );
        store
            .inner()
            .set("dashboard/doc", fields(json!({"n": 1})))
            .await
            .unwrap();

        let mut calls = 0;
        transactional_update(&store, "dashboard/doc", WriteMode::Merge, |current| {
            calls += 1;
            let n = current.and_then(|f| f["n"].as_i64()).unwrap_or(0);
            Ok::<_, StoreError>(Update::new(fields(json!({"n": n + 1})), ()))
        })
        .await
        .unwrap();

        assert_eq!(calls, 2, "mutation re-runs against the fresh document");
        let stored = store.inner().get("dashboard/doc").await.unwrap().unwrap();
        assert_eq!(stored.data["n"], json!(11));
        assert_eq!(stored.data["other"], json!(true));
    }

    #[tokio::test]
    async fn transactional_update_gives_up_under_constant_contention() {
        let store = crate::testing::InterferingStore::always(
            MemoryDocumentStore::new().with_commit_attempts(3),
            "dashboard/doc",
            fields(json!({"n": 0})),
        );

        let err = transactional_update(&store, "dashboard/doc", WriteMode::Overwrite, |_| {
            Ok::<_, StoreError>(Update::new(fields(json!({"n": 1})), ()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StoreError::Contention { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn aborted_mutation_writes_nothing() {
        let store = MemoryDocumentStore::new();
        let result: Result<(), StoreError> =
            transactional_update(&store, "dashboard/doc", WriteMode::Overwrite, |_| {
                Err(StoreError::Unavailable("abort".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(store.get("dashboard/doc").await.unwrap().is_none());
    }

    #[test]
    fn compare_field_orders_missing_values_first() {
        let with = fields(json!({"t": "2024-01-01T00:00:00.000Z"}));
        let without = fields(json!({}));
        assert_eq!(compare_field(&without, &with, "t"), Ordering::Less);
        assert_eq!(compare_field(&with, &with, "t"), Ordering::Equal);
    }
}
