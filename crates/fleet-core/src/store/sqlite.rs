// ABOUTME: SQLite-backed persistence bridge for session status
// ABOUTME: Owns the sessions table and tears down tenant tables on delete_all

use super::{SessionRow, SessionStore};
use crate::error::Result;
use crate::status::SessionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use std::path::Path;
use std::str::FromStr;

/// Per-tenant tables cleared by `delete_all`, each keyed by a `sessionId` column.
///
/// These belong to the worker's own schema; tables that don't exist are skipped.
pub const DEFAULT_TENANT_TABLES: &[&str] = &[
    "session_configurations",
    "session_contacts",
    "session_messages",
    "session_groups",
    "auth_tokens",
    "devices",
];

/// Persistence bridge backed by SQLite
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
    tenant_tables: Vec<String>,
}

impl SqliteSessionStore {
    /// Open or create the store at the given path
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool).await
    }

    /// Open a private in-memory database (single connection so it isn't lost)
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self {
            pool,
            tenant_tables: DEFAULT_TENANT_TABLES.iter().map(|t| t.to_string()).collect(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Replace the set of tenant tables cleared by `delete_all`
    pub fn with_tenant_tables(mut self, tables: Vec<String>) -> Self {
        self.tenant_tables = tables;
        self
    }

    async fn init_schema(&self) -> Result<()> {
        // WAL lets the admin surface read while the supervisor writes
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'starting',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Names of configured tenant tables that actually exist
    async fn existing_tenant_tables(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(&self.pool)
            .await?;
        let present: Vec<String> = rows
            .iter()
            .map(|r| r.try_get::<String, _>("name"))
            .collect::<std::result::Result<_, _>>()?;

        Ok(self
            .tenant_tables
            .iter()
            .filter(|t| present.contains(t))
            .cloned()
            .collect())
    }

    /// Expose the pool for callers that own the tenant schema (tests, migrations)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn upsert(&self, phone: &str, status: &SessionStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO sessions (id, status, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(phone)
        .bind(status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SessionRow>> {
        let rows = sqlx::query_as::<_, SessionDbRow>(
            "SELECT id, status, created_at, updated_at FROM sessions WHERE status != 'logged_out' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn delete_all(&self, phone: &str) -> Result<()> {
        let tables = self.existing_tenant_tables().await?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(phone)
            .execute(&mut *tx)
            .await?;

        for table in &tables {
            // Table names come from our own allowlist, never from callers
            let sql = format!("DELETE FROM \"{}\" WHERE sessionId = ?", table);
            sqlx::query(&sql).bind(phone).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        tracing::debug!(phone = %phone, tables = tables.len(), "Deleted durable session data");
        Ok(())
    }

    async fn get(&self, phone: &str) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionDbRow>(
            "SELECT id, status, created_at, updated_at FROM sessions WHERE id = ?",
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn list(&self) -> Result<Vec<SessionRow>> {
        let rows = sqlx::query_as::<_, SessionDbRow>(
            "SELECT id, status, created_at, updated_at FROM sessions ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

#[derive(sqlx::FromRow)]
struct SessionDbRow {
    id: String,
    status: String,
    created_at: String,
    updated_at: String,
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<SessionDbRow> for SessionRow {
    fn from(row: SessionDbRow) -> Self {
        SessionRow {
            status: SessionStatus::parse(&row.status),
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            phone: row.id,
        }
    }
}
