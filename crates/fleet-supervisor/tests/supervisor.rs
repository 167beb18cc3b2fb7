// ABOUTME: End-to-end tests driving real child processes through the registry.
// ABOUTME: A test task plays the worker by connecting to the socket and writing frames.

use fleet_core::{MemoryEphemeralStore, MemorySessionStore, SessionStatus};
use fleet_proto::{encode_frame, write_frame, WorkerEvent};
use fleet_supervisor::{socket_path, Registry, RegistryError, SupervisorSettings, WorkerCommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::time::{sleep, Instant};

const PHONE: &str = "15551234";

struct Fixture {
    registry: Registry,
    store: Arc<MemorySessionStore>,
    ephemeral: Arc<MemoryEphemeralStore>,
    dir: tempfile::TempDir,
}

impl Fixture {
    fn socket(&self, phone: &str) -> PathBuf {
        socket_path(self.dir.path(), phone)
    }
}

fn sleeping_worker() -> WorkerCommand {
    WorkerCommand::new("sh")
        .arg("-c")
        .arg("sleep 30")
        .arg("worker")
        .forward_output(false)
}

fn counting_worker(runs: &Path) -> WorkerCommand {
    WorkerCommand::new("sh")
        .arg("-c")
        .arg("echo run >> \"$0\"")
        .arg(runs.display().to_string())
        .forward_output(false)
}

fn run_count(runs: &Path) -> usize {
    std::fs::read_to_string(runs)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

fn fixture_with(launcher: WorkerCommand) -> Fixture {
    paced_fixture(launcher, Duration::from_millis(50))
}

fn paced_fixture(launcher: WorkerCommand, restart_delay: Duration) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemorySessionStore::new());
    let ephemeral = Arc::new(MemoryEphemeralStore::new());
    let settings = SupervisorSettings {
        socket_dir: dir.path().to_path_buf(),
        restart_delay,
        retry_delay: Duration::from_millis(50),
        drain_timeout: Duration::from_millis(100),
        ..SupervisorSettings::default()
    };
    let registry = Registry::new(store.clone(), ephemeral.clone(), launcher, settings);
    Fixture {
        registry,
        store,
        ephemeral,
        dir,
    }
}

fn fixture() -> Fixture {
    fixture_with(sleeping_worker())
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check().await {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn connect_worker(path: &Path) -> UnixStream {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match UnixStream::connect(path).await {
            Ok(stream) => return stream,
            Err(e) if Instant::now() > deadline => panic!("worker socket never came up: {}", e),
            Err(_) => sleep(Duration::from_millis(10)).await,
        }
    }
}

async fn send(stream: &mut UnixStream, event: WorkerEvent) {
    stream
        .write_all(&encode_frame(&event).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_pairing_then_connected() {
    let f = fixture();
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();

    let mut worker = connect_worker(&f.socket(PHONE)).await;
    send(
        &mut worker,
        WorkerEvent::connection(PHONE, "pairing", Some("AB12CD".into())),
    )
    .await;

    let registry = f.registry.clone();
    wait_for("pairing status", || {
        let registry = registry.clone();
        async move {
            registry.get(PHONE).await.is_some_and(|w| {
                w.status == SessionStatus::Pairing && w.pairing_code == "AB12CD" && w.is_running
            })
        }
    })
    .await;

    send(&mut worker, WorkerEvent::connection(PHONE, "connected", None)).await;
    wait_for("active status", || {
        let registry = registry.clone();
        async move {
            registry
                .get(PHONE)
                .await
                .is_some_and(|w| w.status == SessionStatus::Active && w.pairing_code.is_empty())
        }
    })
    .await;

    let writes: Vec<SessionStatus> = f.store.writes().into_iter().map(|(_, s)| s).collect();
    assert_eq!(
        writes,
        vec![
            SessionStatus::Starting,
            SessionStatus::Pairing,
            SessionStatus::Active
        ]
    );

    f.registry.shutdown().await;
}

#[tokio::test]
async fn test_start_twice_spawns_one_process() {
    let f = fixture();
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();

    let record = f.registry.record(PHONE).await.unwrap();
    wait_for("first spawn", || {
        let record = record.clone();
        async move { record.pid().is_some() }
    })
    .await;
    let pid = record.pid();

    let err = f
        .registry
        .start(PHONE, SessionStatus::Starting)
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRunning(_)));
    assert_eq!(record.pid(), pid);

    f.registry.shutdown().await;
}

#[tokio::test]
async fn test_pause_unknown_phone_has_no_side_effects() {
    let f = fixture();
    let err = f.registry.pause("999").await.unwrap_err();
    assert!(matches!(err, RegistryError::NotFound(_)));
    assert!(f.registry.list().await.is_empty());
    assert!(f.store.writes().is_empty());
    assert!(!f.socket("999").exists());
}

#[tokio::test]
async fn test_logged_out_tears_worker_down() {
    let f = fixture();
    f.ephemeral.insert(format!("sessions:{}", PHONE));
    f.ephemeral.insert(format!("session:{}:creds", PHONE));
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();
    let record = f.registry.record(PHONE).await.unwrap();

    let mut worker = connect_worker(&f.socket(PHONE)).await;
    send(&mut worker, WorkerEvent::connection(PHONE, "connected", None)).await;
    send(&mut worker, WorkerEvent::connection(PHONE, "logged_out", None)).await;

    wait_for("supervisor loop to finish", || {
        let record = record.clone();
        async move { !record.is_supervised() }
    })
    .await;

    assert!(f.registry.get(PHONE).await.is_none());
    assert!(f.store.status_of(PHONE).is_none());
    assert!(f.ephemeral.keys().is_empty());
    assert_eq!(record.status(), SessionStatus::LoggedOut);
    assert_eq!(record.pid(), None);

    // No restart after a logout
    sleep(Duration::from_millis(200)).await;
    assert!(!f.socket(PHONE).exists());
    assert!(f.registry.list().await.is_empty());
}

#[tokio::test]
async fn test_exited_worker_is_restarted_until_paused() {
    let dir = tempfile::tempdir().unwrap();
    let runs = dir.path().join("runs");
    let f = fixture_with(counting_worker(&runs));
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();

    let count = {
        let runs = runs.clone();
        move || run_count(&runs)
    };

    wait_for("three spawns", || {
        let count = count.clone();
        async move { count() >= 3 }
    })
    .await;
    assert_eq!(f.registry.get(PHONE).await.unwrap().status, SessionStatus::Starting);

    let snapshot = f.registry.pause(PHONE).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Paused);

    let record = f.registry.record(PHONE).await.unwrap();
    wait_for("loop to halt", || {
        let record = record.clone();
        async move { !record.is_supervised() }
    })
    .await;

    let settled = count();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(count(), settled);
    assert_eq!(f.store.status_of(PHONE), Some(SessionStatus::Paused));
}

#[tokio::test]
async fn test_pause_then_resume_relaunches() {
    let f = fixture();
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();
    let record = f.registry.record(PHONE).await.unwrap();

    wait_for("spawn", || {
        let record = record.clone();
        async move { record.pid().is_some() }
    })
    .await;

    f.registry.pause(PHONE).await.unwrap();
    wait_for("paused loop to exit", || {
        let record = record.clone();
        async move { !record.is_supervised() && record.pid().is_none() }
    })
    .await;

    let snapshot = f.registry.resume(PHONE).await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Starting);
    wait_for("respawn", || {
        let record = record.clone();
        async move { record.is_supervised() && record.pid().is_some() }
    })
    .await;

    assert_eq!(
        f.store.writes().last().map(|(_, s)| s.clone()),
        Some(SessionStatus::Starting)
    );
    f.registry.shutdown().await;
}

#[tokio::test]
async fn test_reset_restarts_process_and_drops_quick_session() {
    let f = fixture();
    f.ephemeral.insert(format!("sessions:{}", PHONE));
    f.ephemeral.insert(format!("session:{}:creds", PHONE));
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();
    let record = f.registry.record(PHONE).await.unwrap();

    wait_for("spawn", || {
        let record = record.clone();
        async move { record.pid().is_some() }
    })
    .await;
    let first = record.pid();

    f.registry.reset(PHONE).await.unwrap();
    assert_eq!(f.ephemeral.keys(), vec![format!("session:{}:creds", PHONE)]);

    wait_for("respawn after reset", || {
        let record = record.clone();
        async move { record.pid().is_some() && record.pid() != first }
    })
    .await;

    f.registry.shutdown().await;
}

#[tokio::test]
async fn test_clear_stops_worker_and_erases_session() {
    let f = fixture();
    f.ephemeral.insert(format!("sessions:{}", PHONE));
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();
    let record = f.registry.record(PHONE).await.unwrap();

    let mut worker = connect_worker(&f.socket(PHONE)).await;
    send(&mut worker, WorkerEvent::connection(PHONE, "connected", None)).await;
    wait_for("active", || {
        let record = record.clone();
        async move { record.status() == SessionStatus::Active }
    })
    .await;

    f.registry.clear(PHONE).await.unwrap();
    assert!(f.registry.get(PHONE).await.is_none());

    wait_for("loop to exit", || {
        let record = record.clone();
        async move { !record.is_supervised() }
    })
    .await;
    assert!(f.ephemeral.keys().is_empty());

    // The cleared record must not come back
    sleep(Duration::from_millis(200)).await;
    assert!(f.registry.list().await.is_empty());
}

#[tokio::test]
async fn test_malformed_frames_do_not_break_stream() {
    let f = fixture();
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();

    let mut worker = connect_worker(&f.socket(PHONE)).await;
    write_frame(&mut worker, &[0xff, 0xff, 0xff]).await.unwrap();
    write_frame(&mut worker, &[]).await.unwrap();
    send(&mut worker, WorkerEvent::raw_log("booting")).await;
    send(&mut worker, WorkerEvent::connection("someone-else", "connected", None)).await;

    let registry = f.registry.clone();
    wait_for("active", || {
        let registry = registry.clone();
        async move {
            registry
                .get(PHONE)
                .await
                .is_some_and(|w| w.status == SessionStatus::Active)
        }
    })
    .await;
    assert_eq!(f.store.status_of(PHONE), Some(SessionStatus::Active));

    f.registry.shutdown().await;
}

#[tokio::test]
async fn test_restarts_wait_for_restart_delay() {
    let dir = tempfile::tempdir().unwrap();
    let runs = dir.path().join("runs");
    let f = paced_fixture(counting_worker(&runs), Duration::from_millis(100));
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();

    wait_for("two spawns", || {
        let runs = runs.clone();
        async move { run_count(&runs) >= 2 }
    })
    .await;

    // An instantly exiting worker relaunches at most once per delay
    let before = run_count(&runs);
    sleep(Duration::from_millis(500)).await;
    let spawned = run_count(&runs) - before;
    assert!(spawned >= 1, "worker was not restarted");
    assert!(spawned <= 6, "{} spawns in 500ms with a 100ms delay", spawned);

    f.registry.shutdown().await;
}

#[tokio::test]
async fn test_events_after_clear_do_not_restore_session() {
    let f = fixture();
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();
    let record = f.registry.record(PHONE).await.unwrap();

    let mut worker = connect_worker(&f.socket(PHONE)).await;
    send(&mut worker, WorkerEvent::connection(PHONE, "connected", None)).await;
    wait_for("active", || {
        let record = record.clone();
        async move { record.status() == SessionStatus::Active }
    })
    .await;

    f.registry.clear(PHONE).await.unwrap();
    // The connection is still open while the cleared loop winds down
    let pairing = encode_frame(&WorkerEvent::connection(PHONE, "pairing", Some("AB12CD".into()))).unwrap();
    let _ = worker.write_all(&pairing).await;

    wait_for("loop to exit", || {
        let record = record.clone();
        async move { !record.is_supervised() }
    })
    .await;
    sleep(Duration::from_millis(200)).await;

    assert!(f.store.status_of(PHONE).is_none());
    assert!(!f
        .store
        .writes()
        .iter()
        .any(|(_, status)| *status == SessionStatus::Pairing));
    assert_eq!(record.status(), SessionStatus::Active);
    assert!(f.registry.get(PHONE).await.is_none());
}

#[tokio::test]
async fn test_start_after_clear_keeps_new_socket() {
    let f = fixture();
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();
    let old = f.registry.record(PHONE).await.unwrap();

    let mut first = connect_worker(&f.socket(PHONE)).await;
    send(&mut first, WorkerEvent::connection(PHONE, "connected", None)).await;
    wait_for("first worker active", || {
        let old = old.clone();
        async move { old.status() == SessionStatus::Active }
    })
    .await;

    f.registry.clear(PHONE).await.unwrap();
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();
    let new = f.registry.record(PHONE).await.unwrap();
    assert!(!Arc::ptr_eq(&old, &new));

    wait_for("old loop to exit", || {
        let old = old.clone();
        async move { !old.is_supervised() }
    })
    .await;
    drop(first);

    // The old loop must not have unlinked the socket the new loop bound
    let mut second = connect_worker(&f.socket(PHONE)).await;
    send(&mut second, WorkerEvent::connection(PHONE, "connected", None)).await;
    wait_for("new worker attached", || {
        let new = new.clone();
        async move { new.status() == SessionStatus::Active && new.snapshot().is_running }
    })
    .await;
    assert_eq!(f.store.status_of(PHONE), Some(SessionStatus::Active));

    f.registry.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_leaves_durable_status() {
    let f = fixture();
    f.registry.start(PHONE, SessionStatus::Starting).await.unwrap();
    let record = f.registry.record(PHONE).await.unwrap();

    let mut worker = connect_worker(&f.socket(PHONE)).await;
    send(&mut worker, WorkerEvent::connection(PHONE, "connected", None)).await;
    wait_for("active", || {
        let record = record.clone();
        async move { record.status() == SessionStatus::Active }
    })
    .await;
    let writes = f.store.writes().len();

    f.registry.shutdown().await;

    assert_eq!(f.store.status_of(PHONE), Some(SessionStatus::Active));
    assert_eq!(f.store.writes().len(), writes);
    assert!(!record.is_supervised());
    assert_eq!(record.pid(), None);
    assert!(!f.socket(PHONE).exists());
}
