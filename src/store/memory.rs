use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    compare_field, CollectionItem, ConditionalWrite, DocumentStore, Fields, ListQuery,
    Precondition, StoreError, VersionedDocument, DEFAULT_COMMIT_ATTEMPTS,
};

#[derive(Default)]
struct MemoryState {
    documents: HashMap<String, VersionedDocument>,
    collections: HashMap<String, Vec<CollectionItem>>,
}

impl MemoryState {
    fn put(&mut self, path: &str, data: Fields) {
        let revision = self
            .documents
            .get(path)
            .map(|doc| doc.revision + 1)
            .unwrap_or(1);
        self.documents
            .insert(path.to_string(), VersionedDocument { data, revision });
    }

    fn append(&mut self, collection: &str, data: Fields) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.collections
            .entry(collection.to_string())
            .or_default()
            .push(CollectionItem {
                id: id.clone(),
                data,
            });
        id
    }
}

/// Process-local store. Backs `backend = "memory"` and the test suite.
pub struct MemoryDocumentStore {
    state: RwLock<MemoryState>,
    commit_attempts: u32,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        }
    }

    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts;
        self
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        Ok(self.state.read().await.documents.get(path).cloned())
    }

    async fn set(&self, path: &str, data: Fields) -> Result<(), StoreError> {
        self.state.write().await.put(path, data);
        Ok(())
    }

    async fn add(&self, collection: &str, data: Fields) -> Result<String, StoreError> {
        Ok(self.state.write().await.append(collection, data))
    }

    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> Result<Vec<CollectionItem>, StoreError> {
        let state = self.state.read().await;
        let mut items = state
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default();

        if let Some(field) = &query.order_by {
            // Later inserts win ties, matching the SQLite backend's seq ordering.
            if query.descending {
                items.reverse();
                items.sort_by(|a, b| compare_field(&b.data, &a.data, field));
            } else {
                items.sort_by(|a, b| compare_field(&a.data, &b.data, field));
            }
        }
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        Ok(items)
    }

    async fn commit(&self, write: ConditionalWrite) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let current = state.documents.get(&write.path).map(|doc| doc.revision);
        let holds = match write.precondition {
            Precondition::Missing => current.is_none(),
            Precondition::Revision(expected) => current == Some(expected),
        };
        if !holds {
            return Ok(false);
        }

        state.put(&write.path, write.data);
        for (collection, data) in write.appends {
            state.append(&collection, data);
        }
        Ok(true)
    }

    fn commit_attempts(&self) -> u32 {
        self.commit_attempts
    }
}
