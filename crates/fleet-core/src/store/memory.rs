// ABOUTME: In-process persistence bridge for tests and --memory runs
// ABOUTME: Records every write and can be switched to reject writes on demand

use super::{SessionRow, SessionStore};
use crate::error::{Result, StoreError};
use crate::status::SessionStatus;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
pub struct MemorySessionStore {
    rows: Mutex<HashMap<String, SessionRow>>,
    writes: Mutex<Vec<(String, SessionStatus)>>,
    fail_writes: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a session, as if left behind by a previous run.
    pub fn seed(&self, phone: &str, status: SessionStatus) {
        let now = Utc::now();
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                phone.to_string(),
                SessionRow {
                    phone: phone.to_string(),
                    status,
                    created_at: now,
                    updated_at: now,
                },
            );
    }

    /// Make every subsequent upsert/delete fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every successful upsert so far, in order.
    pub fn writes(&self) -> Vec<(String, SessionStatus)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current durable status for `phone`.
    pub fn status_of(&self, phone: &str) -> Option<SessionStatus> {
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(phone)
            .map(|r| r.status.clone())
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("store configured to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn upsert(&self, phone: &str, status: &SessionStatus) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now();
        {
            let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
            rows.entry(phone.to_string())
                .and_modify(|r| {
                    r.status = status.clone();
                    r.updated_at = now;
                })
                .or_insert_with(|| SessionRow {
                    phone: phone.to_string(),
                    status: status.clone(),
                    created_at: now,
                    updated_at: now,
                });
        }
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((phone.to_string(), status.clone()));
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<SessionRow>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<SessionRow> = rows
            .values()
            .filter(|r| !r.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.phone.cmp(&b.phone));
        Ok(active)
    }

    async fn delete_all(&self, phone: &str) -> Result<()> {
        self.check_writable()?;
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(phone);
        Ok(())
    }

    async fn get(&self, phone: &str) -> Result<Option<SessionRow>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(phone)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<SessionRow>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<SessionRow> = rows.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}
