// ABOUTME: Persistence bridge trait for durable per-phone session status
// ABOUTME: Implementations: SqliteSessionStore (production), MemorySessionStore (tests, --memory)

mod memory;
mod sqlite;

pub use memory::MemorySessionStore;
pub use sqlite::{SqliteSessionStore, DEFAULT_TENANT_TABLES};

use crate::error::Result;
use crate::status::SessionStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub phone: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable store of session status, keyed by phone.
///
/// The supervisor writes through this on every status change and reads it
/// once at startup to resume known sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or update the status for `phone`.
    async fn upsert(&self, phone: &str, status: &SessionStatus) -> Result<()>;

    /// Every session whose status is not `logged_out`.
    async fn list_active(&self) -> Result<Vec<SessionRow>>;

    /// Remove the session and all tenant data for `phone`.
    async fn delete_all(&self, phone: &str) -> Result<()>;

    /// Fetch a single session, if known.
    async fn get(&self, phone: &str) -> Result<Option<SessionRow>>;

    /// Every session, newest first.
    async fn list(&self) -> Result<Vec<SessionRow>>;
}
