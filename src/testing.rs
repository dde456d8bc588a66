//! Test infrastructure: store doubles and seed helpers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

use crate::dashboard::{build_router, DashboardState};
use crate::snapshot::DEFAULT_ACTIVITY_LIMIT;
use crate::store::{
    CollectionItem, ConditionalWrite, DocumentStore, Fields, ListQuery, SqliteDocumentStore,
    StoreError, VersionedDocument,
};

/// Unwrap a `json!({...})` literal into document fields.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

// ---------------------------------------------------------------------------
// Dashboard harness
// ---------------------------------------------------------------------------

/// Router plus the store behind it, backed by an in-memory SQLite database.
pub struct TestDashboard {
    pub store: Arc<dyn DocumentStore>,
    pub router: Router,
}

pub async fn setup_test_dashboard() -> anyhow::Result<TestDashboard> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let store: Arc<dyn DocumentStore> = Arc::new(
        SqliteDocumentStore::from_pool(pool, "test-project")
            .await?
            .with_commit_attempts(20),
    );
    let router = build_router(DashboardState {
        store: store.clone(),
        activity_limit: DEFAULT_ACTIVITY_LIMIT,
        dashboard_token: None,
    });
    Ok(TestDashboard { store, router })
}

impl TestDashboard {
    /// Send one request; `body` is sent as JSON when given.
    pub async fn request(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("valid request");

        let resp = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("router is infallible");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), 1_000_000)
            .await
            .expect("readable body");
        let parsed = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("JSON body")
        };
        (status, parsed)
    }
}

// ---------------------------------------------------------------------------
// FailingStore
// ---------------------------------------------------------------------------

/// A store whose every call fails, as if the backend were unreachable.
pub struct FailingStore;

fn unreachable_backend() -> StoreError {
    StoreError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Err(unreachable_backend())
    }

    async fn get(&self, _path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        Err(unreachable_backend())
    }

    async fn set(&self, _path: &str, _data: Fields) -> Result<(), StoreError> {
        Err(unreachable_backend())
    }

    async fn add(&self, _collection: &str, _data: Fields) -> Result<String, StoreError> {
        Err(unreachable_backend())
    }

    async fn list(
        &self,
        _collection: &str,
        _query: &ListQuery,
    ) -> Result<Vec<CollectionItem>, StoreError> {
        Err(unreachable_backend())
    }

    async fn commit(&self, _write: ConditionalWrite) -> Result<bool, StoreError> {
        Err(unreachable_backend())
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// Delegates to `inner` but fails reads of the listed paths/collections.
pub struct FlakyStore<S> {
    inner: S,
    failing: HashSet<String>,
}

impl<S: DocumentStore> FlakyStore<S> {
    pub fn new(inner: S, failing: &[&str]) -> Self {
        Self {
            inner,
            failing: failing.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn check(&self, path: &str) -> Result<(), StoreError> {
        if self.failing.contains(path) {
            Err(StoreError::Unavailable(format!("read of {path} timed out")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for FlakyStore<S> {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn get(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        self.check(path)?;
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, data: Fields) -> Result<(), StoreError> {
        self.inner.set(path, data).await
    }

    async fn add(&self, collection: &str, data: Fields) -> Result<String, StoreError> {
        self.inner.add(collection, data).await
    }

    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> Result<Vec<CollectionItem>, StoreError> {
        self.check(collection)?;
        self.inner.list(collection, query).await
    }

    async fn commit(&self, write: ConditionalWrite) -> Result<bool, StoreError> {
        self.inner.commit(write).await
    }

    fn commit_attempts(&self) -> u32 {
        self.inner.commit_attempts()
    }
}

// ---------------------------------------------------------------------------
// InterferingStore
// ---------------------------------------------------------------------------

/// Simulates a second client: right before a conditional commit to `path`,
/// overwrites that document with `competing`, so the commit sees a stale
/// revision.
pub struct InterferingStore<S> {
    inner: S,
    path: String,
    competing: Fields,
    remaining: AtomicU32,
}

impl<S: DocumentStore> InterferingStore<S> {
    /// Interfere with the first commit only.
    pub fn new(inner: S, path: &str, competing: Fields) -> Self {
        Self {
            inner,
            path: path.to_string(),
            competing,
            remaining: AtomicU32::new(1),
        }
    }

    /// Interfere with every commit.
    pub fn always(inner: S, path: &str, competing: Fields) -> Self {
        Self {
            remaining: AtomicU32::new(u32::MAX),
            ..Self::new(inner, path, competing)
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: DocumentStore> DocumentStore for InterferingStore<S> {
    async fn ping(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn get(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, data: Fields) -> Result<(), StoreError> {
        self.inner.set(path, data).await
    }

    async fn add(&self, collection: &str, data: Fields) -> Result<String, StoreError> {
        self.inner.add(collection, data).await
    }

    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> Result<Vec<CollectionItem>, StoreError> {
        self.inner.list(collection, query).await
    }

    async fn commit(&self, write: ConditionalWrite) -> Result<bool, StoreError> {
        let interfere = write.path == self.path
            && self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if interfere {
            self.inner.set(&self.path, self.competing.clone()).await?;
        }
        self.inner.commit(write).await
    }

    fn commit_attempts(&self) -> u32 {
        self.inner.commit_attempts()
    }
}
