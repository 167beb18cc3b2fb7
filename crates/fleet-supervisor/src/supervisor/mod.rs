// ABOUTME: Per-worker supervisor loop: bind socket, spawn process, attach, restart on exit.
// ABOUTME: Stops for good on logged_out (with teardown), pause, clear, or daemon shutdown.

pub mod spawn;

pub use spawn::WorkerCommand;

use crate::interpreter;
use crate::registry::Registry;
use crate::worker::{Cycle, WorkerRecord};
use fleet_core::Config;
use fleet_proto::{FrameReader, DEFAULT_MAX_FRAME_LEN};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Timing and placement knobs for supervisor loops.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub socket_dir: PathBuf,
    /// Pause between a process exit and the next spawn.
    pub restart_delay: Duration,
    /// Pause after a failed bind or spawn.
    pub retry_delay: Duration,
    /// How long to wait for in-flight events after the process exits.
    pub drain_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            socket_dir: std::env::temp_dir(),
            restart_delay: Duration::from_secs(2),
            retry_delay: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(2),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            socket_dir: config.socket_dir_expanded(),
            restart_delay: config.supervisor.restart_delay(),
            retry_delay: config.supervisor.retry_delay(),
            drain_timeout: config.supervisor.drain_timeout(),
            max_frame_len: config.supervisor.max_frame_len,
        }
    }

    pub fn socket_path(&self, phone: &str) -> PathBuf {
        socket_path(&self.socket_dir, phone)
    }
}

/// Control socket path for a phone: `<dir>/fleet_<phone>.sock`.
pub fn socket_path(dir: &Path, phone: &str) -> PathBuf {
    dir.join(format!("fleet_{}.sock", phone))
}

/// How one spawn-to-exit cycle ended.
#[derive(Debug)]
enum CycleEnd {
    /// The process exited on its own or was stopped on request.
    Finished,
    /// Bind or spawn failed; try again after the retry delay.
    Retry,
    /// The daemon is shutting down.
    Shutdown,
}

/// What ended the wait on a running process.
#[derive(Debug)]
enum Ending {
    Exited(io::Result<ExitStatus>),
    Stopped,
    Shutdown,
}

/// Own `record` until the worker reaches a state with no further restarts.
///
/// The caller must have claimed supervision of the record.
pub(crate) async fn run(registry: Registry, record: Arc<WorkerRecord>) {
    let phone = record.phone().to_string();
    let settings = registry.settings().clone();
    let shutdown = registry.shutdown_token();
    let socket = settings.socket_path(&phone);

    tracing::debug!(phone = %phone, socket = %socket.display(), "Supervisor loop started");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let stop = match record.begin_cycle() {
            Cycle::Run(token) => token,
            Cycle::Terminal => {
                registry.teardown(&record).await;
                break;
            }
            // begin_cycle already gave up supervision; a resume may own it now
            Cycle::Halt => {
                tracing::debug!(phone = %phone, status = %record.status(), "Supervisor loop finished");
                return;
            }
        };

        let delay = match run_cycle(&registry, &record, &socket, &stop).await {
            CycleEnd::Finished => settings.restart_delay,
            CycleEnd::Retry => settings.retry_delay,
            CycleEnd::Shutdown => break,
        };

        // Terminal, paused, and cleared records are handled at the top without waiting
        if record.wants_restart() {
            tracing::info!(phone = %phone, delay_ms = delay.as_millis() as u64, "Restarting worker");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }
    }

    record.release_supervision();
    tracing::debug!(phone = %phone, status = %record.status(), "Supervisor loop finished");
}

async fn run_cycle(
    registry: &Registry,
    record: &Arc<WorkerRecord>,
    socket: &Path,
    stop: &CancellationToken,
) -> CycleEnd {
    let phone = record.phone();
    let settings = registry.settings();
    let shutdown = registry.shutdown_token();

    remove_socket(socket);
    let listener = match UnixListener::bind(socket) {
        Ok(listener) => listener,
        Err(e) => {
            tracing::warn!(phone = %phone, socket = %socket.display(), error = %e, "Failed to bind worker socket");
            return CycleEnd::Retry;
        }
    };
    let bound = SocketId::of(socket);

    let mut child = match registry.launcher().spawn(phone, socket) {
        Ok(child) => child,
        Err(e) => {
            tracing::warn!(phone = %phone, error = %e, "Failed to spawn worker");
            release_socket(socket, bound);
            drop(listener);
            return CycleEnd::Retry;
        }
    };
    record.set_pid(child.id());

    let mut pipeline: Option<JoinHandle<usize>> = None;

    let first = tokio::select! {
        status = child.wait() => Some(Ending::Exited(status)),
        _ = stop.cancelled() => Some(Ending::Stopped),
        _ = shutdown.cancelled() => Some(Ending::Shutdown),
        accepted = listener.accept() => {
            match accepted {
                Ok((stream, _)) => {
                    record.mark_attached();
                    tracing::info!(phone = %phone, "Worker attached");
                    let reader = FrameReader::new(stream).with_max_frame_len(settings.max_frame_len);
                    pipeline = Some(tokio::spawn(interpreter::run_pipeline(
                        reader,
                        record.clone(),
                        registry.store(),
                    )));
                }
                Err(e) => {
                    tracing::warn!(phone = %phone, error = %e, "Failed to accept worker connection");
                }
            }
            None
        }
    };

    // Only the first connection is read; the listener stays bound so later
    // connects don't error, but nothing accepts them.
    let ending = match first {
        Some(ending) => ending,
        None => wait_for_exit(&mut child, stop, &shutdown).await,
    };

    match &ending {
        Ending::Exited(Ok(status)) => {
            tracing::warn!(phone = %phone, status = %status, "Worker exited");
        }
        Ending::Exited(Err(e)) => {
            tracing::warn!(phone = %phone, error = %e, "Failed waiting on worker");
        }
        Ending::Stopped | Ending::Shutdown => {
            tracing::info!(phone = %phone, "Stopping worker");
            if let Err(e) = child.kill().await {
                tracing::warn!(phone = %phone, error = %e, "Failed to kill worker");
            }
        }
    }

    if let Some(mut task) = pipeline {
        if matches!(ending, Ending::Shutdown) {
            task.abort();
        } else if tokio::time::timeout(settings.drain_timeout, &mut task)
            .await
            .is_err()
        {
            tracing::debug!(phone = %phone, "Event stream still open after exit; abandoning it");
            task.abort();
        }
    }

    release_socket(socket, bound);
    drop(listener);
    record.mark_exited();

    match ending {
        Ending::Shutdown => CycleEnd::Shutdown,
        _ => CycleEnd::Finished,
    }
}

async fn wait_for_exit(
    child: &mut Child,
    stop: &CancellationToken,
    shutdown: &CancellationToken,
) -> Ending {
    tokio::select! {
        status = child.wait() => Ending::Exited(status),
        _ = stop.cancelled() => Ending::Stopped,
        _ = shutdown.cancelled() => Ending::Shutdown,
    }
}

/// Filesystem identity of a bound socket file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketId {
    dev: u64,
    ino: u64,
}

impl SocketId {
    fn of(path: &Path) -> Option<Self> {
        std::fs::symlink_metadata(path).ok().map(|meta| Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }
}

/// Unlink the socket this cycle bound, unless a newer loop for the same
/// phone has since replaced the file.
fn release_socket(path: &Path, bound: Option<SocketId>) {
    match (bound, SocketId::of(path)) {
        (Some(ours), Some(current)) if ours == current => remove_socket(path),
        (_, None) => {}
        _ => tracing::debug!(socket = %path.display(), "Socket was rebound elsewhere; leaving it"),
    }
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::debug!(socket = %path.display(), error = %e, "Failed to remove stale socket");
        }
    }
}
