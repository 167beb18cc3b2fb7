// ABOUTME: Process-wide map from phone to worker record, plus the administrative operations.
// ABOUTME: Starts supervisor loops, and handles pause, resume, reset, clear, and startup reconcile.

use crate::supervisor::{self, SupervisorSettings, WorkerCommand};
use crate::worker::{WorkerRecord, WorkerSnapshot};
use fleet_core::{validate_phone, EphemeralStore, SessionRow, SessionStatus, SessionStore, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("worker for {0} is already running")]
    AlreadyRunning(String),

    #[error("no worker registered for {0}")]
    NotFound(String),

    #[error("invalid phone identifier: {0:?}")]
    InvalidPhone(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Counts from a startup reconcile.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub started: usize,
    pub paused: usize,
}

struct Inner {
    // Lock order: this map, then a record's own lock. Never the reverse.
    workers: RwLock<HashMap<String, Arc<WorkerRecord>>>,
    store: Arc<dyn SessionStore>,
    ephemeral: Arc<dyn EphemeralStore>,
    launcher: WorkerCommand,
    settings: SupervisorSettings,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Shared handle to the worker registry. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(
        store: Arc<dyn SessionStore>,
        ephemeral: Arc<dyn EphemeralStore>,
        launcher: WorkerCommand,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                workers: RwLock::new(HashMap::new()),
                store,
                ephemeral,
                launcher,
                settings,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub(crate) fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    pub(crate) fn launcher(&self) -> &WorkerCommand {
        &self.inner.launcher
    }

    pub(crate) fn store(&self) -> Arc<dyn SessionStore> {
        self.inner.store.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    async fn lookup(&self, phone: &str) -> Option<Arc<WorkerRecord>> {
        self.inner.workers.read().await.get(phone).cloned()
    }

    /// The live record for `phone`, if registered.
    pub async fn record(&self, phone: &str) -> Option<Arc<WorkerRecord>> {
        self.lookup(phone).await
    }

    pub async fn get(&self, phone: &str) -> Option<WorkerSnapshot> {
        self.lookup(phone).await.map(|r| r.snapshot())
    }

    /// Snapshots of every registered worker, sorted by phone.
    pub async fn list(&self) -> Vec<WorkerSnapshot> {
        let records: Vec<Arc<WorkerRecord>> =
            self.inner.workers.read().await.values().cloned().collect();
        let mut snapshots: Vec<WorkerSnapshot> = records.iter().map(|r| r.snapshot()).collect();
        snapshots.sort_by(|a, b| a.phone.cmp(&b.phone));
        snapshots
    }

    /// Register `phone` (if new) and begin supervising it.
    ///
    /// Fails with `AlreadyRunning` while a process is attached or a loop
    /// already owns the record.
    pub async fn start(&self, phone: &str, initial: SessionStatus) -> Result<()> {
        ensure_valid(phone)?;

        let record = {
            let mut workers = self.inner.workers.write().await;
            let record = workers
                .entry(phone.to_string())
                .or_insert_with(|| Arc::new(WorkerRecord::new(phone, initial.clone())))
                .clone();
            if !record.claim_supervision() {
                return Err(RegistryError::AlreadyRunning(phone.to_string()));
            }
            record.set_status(initial.clone());
            record
        };

        {
            let _persist = record.persist_lock().await;
            self.persist(phone, &initial).await;
        }
        self.spawn_supervisor(record);
        Ok(())
    }

    pub async fn pause(&self, phone: &str) -> Result<WorkerSnapshot> {
        self.set_paused(phone, true).await
    }

    pub async fn resume(&self, phone: &str) -> Result<WorkerSnapshot> {
        self.set_paused(phone, false).await
    }

    /// Pause stops the process and keeps it stopped; resume clears the pause
    /// and relaunches supervision.
    ///
    /// A worker that has logged out or is being cleared counts as gone.
    pub async fn set_paused(&self, phone: &str, pause: bool) -> Result<WorkerSnapshot> {
        let not_found = || RegistryError::NotFound(phone.to_string());
        let record = self.lookup(phone).await.ok_or_else(not_found)?;

        {
            let _persist = record.persist_lock().await;
            let status = record.set_paused(pause).ok_or_else(not_found)?;
            self.persist(phone, &status).await;
        }

        // A loop still winding down from the pause picks the new status up itself
        if !pause && record.claim_supervision() {
            self.spawn_supervisor(record.clone());
        }

        tracing::info!(phone = %phone, paused = pause, "Worker pause state changed");
        Ok(record.snapshot())
    }

    /// Force a fresh pairing handshake: drop the quick-session key and
    /// restart the process if one is running.
    pub async fn reset(&self, phone: &str) -> Result<()> {
        ensure_valid(phone)?;

        let stopped = match self.lookup(phone).await {
            Some(record) => record.request_stop(),
            None => false,
        };
        self.inner.ephemeral.clear_quick_session(phone).await?;

        tracing::info!(phone = %phone, restarted = stopped, "Reset worker session");
        Ok(())
    }

    /// Remove the worker and erase its durable and ephemeral session data.
    ///
    /// Both cleanups are attempted; the first failure is returned.
    pub async fn clear(&self, phone: &str) -> Result<()> {
        ensure_valid(phone)?;

        let removed = self.inner.workers.write().await.remove(phone);
        // Holding the persist lock through the deletes means no in-flight
        // event can write the row back after it is gone.
        let _persist = match &removed {
            Some(record) => {
                let guard = record.persist_lock().await;
                record.detach();
                Some(guard)
            }
            None => None,
        };

        let durable = self.inner.store.delete_all(phone).await;
        if let Err(e) = &durable {
            tracing::warn!(phone = %phone, error = %e, "Failed to delete durable session data");
        }
        let ephemeral = self.inner.ephemeral.clear_all(phone).await;
        if let Err(e) = &ephemeral {
            tracing::warn!(phone = %phone, error = %e, "Failed to clear ephemeral session data");
        }

        tracing::info!(phone = %phone, registered = removed.is_some(), "Cleared worker session");
        durable?;
        ephemeral?;
        Ok(())
    }

    /// Every durable session row, including ones with no live worker.
    pub async fn stored_sessions(&self) -> Result<Vec<SessionRow>> {
        Ok(self.inner.store.list().await?)
    }

    /// The durable session row for `phone`.
    pub async fn stored_session(&self, phone: &str) -> Result<SessionRow> {
        self.inner
            .store
            .get(phone)
            .await?
            .ok_or_else(|| RegistryError::NotFound(phone.to_string()))
    }

    /// Load every non-terminal session from the store and bring it back:
    /// paused sessions are registered without a process, the rest are started.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let sessions = self.inner.store.list_active().await?;
        let mut summary = ReconcileSummary::default();

        for row in sessions {
            if !validate_phone(&row.phone) {
                tracing::warn!(phone = %row.phone, "Skipping stored session with invalid phone");
                continue;
            }

            if row.status.is_paused() {
                self.inner
                    .workers
                    .write()
                    .await
                    .entry(row.phone.clone())
                    .or_insert_with(|| Arc::new(WorkerRecord::new(&row.phone, SessionStatus::Paused)));
                summary.paused += 1;
                continue;
            }

            match self.start(&row.phone, SessionStatus::Starting).await {
                Ok(()) => summary.started += 1,
                Err(RegistryError::AlreadyRunning(_)) => {}
                Err(e) => {
                    tracing::warn!(phone = %row.phone, error = %e, "Failed to resume stored session");
                }
            }
        }

        tracing::info!(
            "Reconciled sessions: {} active, {} paused",
            summary.started,
            summary.paused
        );
        Ok(summary)
    }

    /// Stop every worker process and wait for all supervisor loops to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        tracing::info!("All supervisor loops stopped");
    }

    /// Final cleanup after a worker logged out.
    pub(crate) async fn teardown(&self, record: &Arc<WorkerRecord>) {
        let phone = record.phone();
        {
            let mut workers = self.inner.workers.write().await;
            // A newer record may have taken the slot after a clear and start
            if workers.get(phone).is_some_and(|r| Arc::ptr_eq(r, record)) {
                workers.remove(phone);
            }
        }
        let _persist = record.persist_lock().await;
        record.detach();

        if let Err(e) = self.inner.store.delete_all(phone).await {
            tracing::warn!(phone = %phone, error = %e, "Failed to delete durable session data");
        }
        if let Err(e) = self.inner.ephemeral.clear_all(phone).await {
            tracing::warn!(phone = %phone, error = %e, "Failed to clear ephemeral session data");
        }
        tracing::info!(phone = %phone, "Worker logged out; session removed");
    }

    async fn persist(&self, phone: &str, status: &SessionStatus) {
        if let Err(e) = self.inner.store.upsert(phone, status).await {
            tracing::warn!(phone = %phone, status = %status, error = %e, "Failed to persist worker status");
        }
    }

    fn spawn_supervisor(&self, record: Arc<WorkerRecord>) {
        self.inner
            .tasks
            .spawn(supervisor::run(self.clone(), record));
    }
}

fn ensure_valid(phone: &str) -> Result<()> {
    if validate_phone(phone) {
        Ok(())
    } else {
        Err(RegistryError::InvalidPhone(phone.to_string()))
    }
}
