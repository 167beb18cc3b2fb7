// ABOUTME: Per-phone worker record: status, pairing code, running flag, and stop signal.
// ABOUTME: State sits behind a short sync lock; an async persist lock orders durable writes.

use fleet_core::SessionStatus;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio_util::sync::CancellationToken;

/// Observable fields of a worker, copied out under its lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub phone: String,
    pub status: SessionStatus,
    /// Empty unless the worker is pairing.
    pub pairing_code: String,
    pub is_running: bool,
}

#[derive(Debug)]
pub(crate) struct WorkerState {
    pub(crate) status: SessionStatus,
    pub(crate) pairing_code: Option<String>,
    /// Process alive and its control connection accepted.
    pub(crate) is_running: bool,
    /// A supervisor loop currently owns this record.
    supervised: bool,
    /// Removed from the registry; the owning loop must not restart.
    pub(crate) detached: bool,
    /// Stop signal for the current supervisor cycle.
    stop: Option<CancellationToken>,
    pid: Option<u32>,
}

impl WorkerState {
    /// Move to `status`, dropping the pairing code unless still pairing.
    pub(crate) fn transition(&mut self, status: SessionStatus) {
        if status != SessionStatus::Pairing {
            self.pairing_code = None;
        }
        self.status = status;
    }

    fn cancel_cycle(&mut self) -> bool {
        match &self.stop {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// What the supervisor loop should do at the top of a cycle.
#[derive(Debug)]
pub(crate) enum Cycle {
    /// Bind, spawn, and attach; the token fires when the process must be stopped.
    Run(CancellationToken),
    /// Status is terminal: tear the worker down and stop for good.
    Terminal,
    /// Paused or detached: stop the loop. Supervision is already released.
    Halt,
}

#[derive(Debug)]
pub struct WorkerRecord {
    phone: String,
    state: Mutex<WorkerState>,
    // Held across a status check and its store write, and across clear/teardown
    persist: AsyncMutex<()>,
}

impl WorkerRecord {
    pub fn new(phone: impl Into<String>, status: SessionStatus) -> Self {
        Self {
            phone: phone.into(),
            state: Mutex::new(WorkerState {
                status,
                pairing_code: None,
                is_running: false,
                supervised: false,
                detached: false,
                stop: None,
                pid: None,
            }),
            persist: AsyncMutex::new(()),
        }
    }

    pub fn phone(&self) -> &str {
        &self.phone
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let state = self.lock();
        WorkerSnapshot {
            phone: self.phone.clone(),
            status: state.status.clone(),
            pairing_code: state.pairing_code.clone().unwrap_or_default(),
            is_running: state.is_running,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status.clone()
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    pub fn is_supervised(&self) -> bool {
        self.lock().supervised
    }

    pub fn is_detached(&self) -> bool {
        self.lock().detached
    }

    /// Serialize durable writes for this phone against clear and teardown.
    pub(crate) async fn persist_lock(&self) -> AsyncMutexGuard<'_, ()> {
        self.persist.lock().await
    }

    /// Administrative status change.
    pub(crate) fn set_status(&self, status: SessionStatus) {
        self.lock().transition(status);
    }

    /// Pause (stopping the process) or resume (back to starting).
    ///
    /// Refused once the worker has logged out or been cleared.
    pub(crate) fn set_paused(&self, pause: bool) -> Option<SessionStatus> {
        let mut state = self.lock();
        if state.detached || state.status.is_terminal() {
            return None;
        }
        if pause {
            state.transition(SessionStatus::Paused);
            state.cancel_cycle();
        } else {
            state.transition(SessionStatus::Starting);
        }
        Some(state.status.clone())
    }

    /// Ask the owning loop to stop the current process. Does not wait.
    pub(crate) fn request_stop(&self) -> bool {
        self.lock().cancel_cycle()
    }

    /// Mark the record as removed from the registry and stop its process.
    pub(crate) fn detach(&self) {
        let mut state = self.lock();
        state.detached = true;
        state.cancel_cycle();
    }

    /// Take ownership for a new supervisor loop.
    ///
    /// Fails while another loop owns the record or a process is attached.
    pub(crate) fn claim_supervision(&self) -> bool {
        let mut state = self.lock();
        if state.supervised || state.is_running {
            return false;
        }
        state.supervised = true;
        true
    }

    pub(crate) fn release_supervision(&self) {
        let mut state = self.lock();
        state.supervised = false;
        state.is_running = false;
        state.stop = None;
        state.pid = None;
    }

    /// Decide the next cycle. On `Halt` supervision is released under the
    /// same lock, so a concurrent resume can always claim the record.
    pub(crate) fn begin_cycle(&self) -> Cycle {
        let mut state = self.lock();
        if state.status.is_terminal() && !state.detached {
            return Cycle::Terminal;
        }
        if state.detached || state.status.is_paused() {
            state.supervised = false;
            state.is_running = false;
            state.stop = None;
            state.pid = None;
            return Cycle::Halt;
        }
        let token = CancellationToken::new();
        state.stop = Some(token.clone());
        Cycle::Run(token)
    }

    /// Whether the next cycle would spawn a process.
    pub(crate) fn wants_restart(&self) -> bool {
        let state = self.lock();
        !state.detached && !state.status.is_terminal() && !state.status.is_paused()
    }

    pub(crate) fn set_pid(&self, pid: Option<u32>) {
        self.lock().pid = pid;
    }

    pub(crate) fn mark_attached(&self) {
        self.lock().is_running = true;
    }

    pub(crate) fn mark_exited(&self) {
        let mut state = self.lock();
        state.is_running = false;
        state.stop = None;
        state.pid = None;
    }
}
