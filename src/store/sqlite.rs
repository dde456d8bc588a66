//! SQLite-backed document store. Every document lives under a project
//! namespace so several installs can share one database file.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;

use super::{
    CollectionItem, ConditionalWrite, DocumentStore, Fields, ListQuery, Precondition, StoreError,
    VersionedDocument, DEFAULT_COMMIT_ATTEMPTS,
};

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    project: String,
    commit_attempts: u32,
}

impl SqliteDocumentStore {
    /// Open (or create) the database file and run migrations.
    pub async fn open(db_path: &str, project: &str) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await?;

        info!(db_path, project, "Document store opened");
        Self::from_pool(pool, project).await
    }

    pub async fn from_pool(pool: SqlitePool, project: &str) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            project: project.to_string(),
            commit_attempts: DEFAULT_COMMIT_ATTEMPTS,
        };
        store.migrate().await?;
        Ok(store)
    }

    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts;
        self
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                project TEXT NOT NULL,
                path TEXT NOT NULL,
                data TEXT NOT NULL,
                revision INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (project, path)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collection_items (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                project TEXT NOT NULL,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (project, collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_collection_items_collection
             ON collection_items(project, collection)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn decode(&self, path: &str, raw: &str) -> Result<Fields, StoreError> {
        serde_json::from_str(raw).map_err(|source| StoreError::Malformed {
            path: path.to_string(),
            source,
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<VersionedDocument>, StoreError> {
        let row = sqlx::query("SELECT data, revision FROM documents WHERE project = ? AND path = ?")
            .bind(&self.project)
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("data");
                Ok(Some(VersionedDocument {
                    data: self.decode(path, &raw)?,
                    revision: row.get("revision"),
                }))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, path: &str, data: Fields) -> Result<(), StoreError> {
        let raw = serde_json::to_string(&data)?;
        sqlx::query(
            "INSERT INTO documents (project, path, data, revision, updated_at)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(project, path) DO UPDATE SET
                data = excluded.data,
                revision = documents.revision + 1,
                updated_at = excluded.updated_at",
        )
        .bind(&self.project)
        .bind(path)
        .bind(&raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add(&self, collection: &str, data: Fields) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let raw = serde_json::to_string(&data)?;
        sqlx::query(
            "INSERT INTO collection_items (project, collection, id, data, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&self.project)
        .bind(collection)
        .bind(&id)
        .bind(&raw)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> Result<Vec<CollectionItem>, StoreError> {
        let direction = if query.descending { "DESC" } else { "ASC" };
        let order = match &query.order_by {
            Some(_) => format!("json_extract(data, ?) {direction}, seq {direction}"),
            None => "seq ASC".to_string(),
        };
        // SQLite treats a negative LIMIT as "no limit".
        let sql = format!(
            "SELECT id, data FROM collection_items
             WHERE project = ? AND collection = ?
             ORDER BY {order} LIMIT ?"
        );

        let mut q = sqlx::query(&sql).bind(&self.project).bind(collection);
        if let Some(field) = &query.order_by {
            q = q.bind(format!("$.{field}"));
        }
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let raw: String = row.get("data");
            let data = self.decode(&format!("{collection}/{id}"), &raw)?;
            items.push(CollectionItem { id, data });
        }
        Ok(items)
    }

    async fn commit(&self, write: ConditionalWrite) -> Result<bool, StoreError> {
        let raw = serde_json::to_string(&write.data)?;
        let now = Utc::now().to_rfc3339();

        // The guarded write is the first statement, so the transaction takes
        // the write lock up front instead of upgrading from a read.
        let mut tx = self.pool.begin().await?;

        let result = match write.precondition {
            Precondition::Missing => {
                sqlx::query(
                    "INSERT INTO documents (project, path, data, revision, updated_at)
                     VALUES (?, ?, ?, 1, ?)
                     ON CONFLICT(project, path) DO NOTHING",
                )
                .bind(&self.project)
                .bind(&write.path)
                .bind(&raw)
                .bind(&now)
                .execute(&mut *tx)
                .await?
            }
            Precondition::Revision(expected) => {
                sqlx::query(
                    "UPDATE documents SET data = ?, revision = revision + 1, updated_at = ?
                     WHERE project = ? AND path = ? AND revision = ?",
                )
                .bind(&raw)
                .bind(&now)
                .bind(&self.project)
                .bind(&write.path)
                .bind(expected)
                .execute(&mut *tx)
                .await?
            }
        };

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (collection, data) in &write.appends {
            sqlx::query(
                "INSERT INTO collection_items (project, collection, id, data, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&self.project)
            .bind(collection)
            .bind(uuid::Uuid::new_v4().simple().to_string())
            .bind(serde_json::to_string(data)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    fn commit_attempts(&self) -> u32 {
        self.commit_attempts
    }
}
