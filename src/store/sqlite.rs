use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::document::{
    DocumentId, DocumentMetadata, DocumentPatch, DocumentRecord, FileStat, dir_prefix_key,
    path_key,
};
use crate::error::{DocError, DocResult};
use crate::store::DocumentStore;
use crate::store::retry::{RetryPolicy, with_retry};

const RECORD_COLUMNS: &str = "id, title, content, file_path, metadata, created_at, updated_at";

/// SQLite-backed document store.
///
/// Runs in WAL mode so readers never wait on the single writer; write serialization is
/// left to the engine. Every operation goes through [`with_retry`].
#[derive(Clone)]
pub struct SqliteDocumentStore {
    pub(crate) pool: SqlitePool,
    retry: RetryPolicy,
}

impl SqliteDocumentStore {
    /// Opens (creating if needed) the database file at `db_path` in WAL mode.
    pub async fn open(db_path: &Path, retry: RetryPolicy) -> DocResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(retry.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        tracing::info!(path = %db_path.display(), "opened document store");
        Self::from_pool(pool, retry).await
    }

    /// Wraps a pool constructed by the caller and makes sure the schema exists.
    pub async fn from_pool(pool: SqlitePool, retry: RetryPolicy) -> DocResult<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                file_path TEXT UNIQUE NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS documents_updated_at ON documents(updated_at)",
        )
        .execute(&pool)
        .await?;

        Ok(SqliteDocumentStore { pool, retry })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

fn record_from_row(row: &SqliteRow) -> DocResult<DocumentRecord> {
    let file_path: String = row.try_get("file_path")?;
    let raw_metadata: String = row.try_get("metadata")?;

    Ok(DocumentRecord {
        id: DocumentId::from(row.try_get::<String, _>("id")?),
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        metadata: DocumentMetadata::parse_lenient(&raw_metadata, &file_path),
        file_path: PathBuf::from(file_path),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_by_path(&self, path: &Path) -> DocResult<Option<DocumentRecord>> {
        let pool = &self.pool;
        let key = path_key(path);
        let key = key.as_str();
        let sql = format!("SELECT {RECORD_COLUMNS} FROM documents WHERE file_path = ?");
        let sql = sql.as_str();

        with_retry(&self.retry, "get_by_path", || async move {
            let row = sqlx::query(sql).bind(key).fetch_optional(pool).await?;
            row.as_ref().map(record_from_row).transpose()
        })
        .await
    }

    async fn get_by_id(&self, id: &DocumentId) -> DocResult<Option<DocumentRecord>> {
        let pool = &self.pool;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM documents WHERE id = ?");
        let sql = sql.as_str();

        with_retry(&self.retry, "get_by_id", || async move {
            let row = sqlx::query(sql).bind(id.as_str()).fetch_optional(pool).await?;
            row.as_ref().map(record_from_row).transpose()
        })
        .await
    }

    async fn create(
        &self,
        title: &str,
        content: &str,
        path: &Path,
        stat: &FileStat,
    ) -> DocResult<DocumentId> {
        let pool = &self.pool;
        let id = DocumentId::generate();
        let id_str = id.as_str();
        let key = path_key(path);
        let key = key.as_str();
        let metadata = DocumentMetadata::from_stat(stat).to_json();
        let metadata = metadata.as_str();
        let now = Utc::now();

        with_retry(&self.retry, "create", || async move {
            sqlx::query(
                "INSERT INTO documents (id, title, content, file_path, metadata, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(id_str)
            .bind(title)
            .bind(content)
            .bind(key)
            .bind(metadata)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;
            Ok(())
        })
        .await?;

        tracing::debug!(id = %id, path = %key, "created document");
        Ok(id)
    }

    async fn update(&self, id: &DocumentId, patch: DocumentPatch) -> DocResult<()> {
        let pool = &self.pool;
        let title = patch.title.as_deref();
        let content = patch.content.as_deref();
        let metadata = patch.metadata.as_ref().map(DocumentMetadata::to_json);
        let metadata = metadata.as_deref();
        let now = Utc::now();

        let res = with_retry(&self.retry, "update", || async move {
            let res = sqlx::query(
                "UPDATE documents SET
                    title = COALESCE(?, title),
                    content = COALESCE(?, content),
                    metadata = COALESCE(?, metadata),
                    updated_at = ?
                 WHERE id = ?",
            )
            .bind(title)
            .bind(content)
            .bind(metadata)
            .bind(now)
            .bind(id.as_str())
            .execute(pool)
            .await?;
            Ok(res)
        })
        .await?;

        if res.rows_affected() == 0 {
            return Err(DocError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn soft_delete(&self, path: &Path) -> DocResult<Option<DocumentId>> {
        let pool = &self.pool;
        let key = path_key(path);
        let key = key.as_str();
        let now = Utc::now();

        with_retry(&self.retry, "soft_delete", || async move {
            let mut tx = pool.begin().await?;

            let row = sqlx::query("SELECT id, metadata FROM documents WHERE file_path = ?")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

            let Some(row) = row else {
                tx.commit().await?;
                return Ok(None);
            };

            let id: String = row.try_get("id")?;
            let raw_metadata: String = row.try_get("metadata")?;
            let mut metadata = DocumentMetadata::parse_lenient(&raw_metadata, key);

            if !metadata.deleted {
                metadata.mark_deleted(now);
                sqlx::query("UPDATE documents SET metadata = ?, updated_at = ? WHERE id = ?")
                    .bind(metadata.to_json())
                    .bind(now)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
            }

            tx.commit().await?;
            Ok(Some(DocumentId::from(id)))
        })
        .await
    }

    async fn soft_delete_under(&self, dir: &Path) -> DocResult<Vec<DocumentId>> {
        let pool = &self.pool;
        let prefix = dir_prefix_key(dir);
        let prefix = prefix.as_str();
        // substr counts characters, not bytes
        let prefix_len = prefix.chars().count() as i64;
        let now = Utc::now();

        let ids = with_retry(&self.retry, "soft_delete_under", || async move {
            let mut tx = pool.begin().await?;

            let rows = sqlx::query(
                "SELECT id, file_path, metadata FROM documents WHERE substr(file_path, 1, ?) = ?",
            )
            .bind(prefix_len)
            .bind(prefix)
            .fetch_all(&mut *tx)
            .await?;

            let mut flagged = Vec::new();
            for row in rows {
                let id: String = row.try_get("id")?;
                let file_path: String = row.try_get("file_path")?;
                let raw_metadata: String = row.try_get("metadata")?;
                let mut metadata = DocumentMetadata::parse_lenient(&raw_metadata, &file_path);
                if metadata.deleted {
                    continue;
                }

                metadata.mark_deleted(now);
                sqlx::query("UPDATE documents SET metadata = ?, updated_at = ? WHERE id = ?")
                    .bind(metadata.to_json())
                    .bind(now)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                flagged.push(DocumentId::from(id));
            }

            tx.commit().await?;
            Ok(flagged)
        })
        .await?;

        if !ids.is_empty() {
            tracing::debug!(dir = %prefix, count = ids.len(), "soft-deleted documents under directory");
        }
        Ok(ids)
    }

    async fn list_all(&self) -> DocResult<Vec<DocumentRecord>> {
        let pool = &self.pool;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM documents ORDER BY file_path");
        let sql = sql.as_str();

        with_retry(&self.retry, "list_all", || async move {
            let rows = sqlx::query(sql).fetch_all(pool).await?;
            rows.iter().map(record_from_row).collect()
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("closed document store");
    }
}
