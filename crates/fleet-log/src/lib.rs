// ABOUTME: Shared logging setup for the fleet daemon and its control client
// ABOUTME: Two functions: init() for stderr, init_file() for detached daemons

use tracing_subscriber::EnvFilter;

/// Log target used for lines and events coming from worker processes.
pub const WORKER_TARGET: &str = "fleet::worker";

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// File-based logging for detached runs. Default: INFO level, RUST_LOG override.
/// Logs to ~/.local/state/fleet/{app_name}.log (falls back to the data dir).
/// If setup fails, prints a warning to stderr and falls back to stderr logging.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
        init();
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let base = dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .ok_or("could not determine state directory")?;
    let log_dir = base.join("fleet");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{app_name}.log")))?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_ansi(false)
        .try_init()?;

    Ok(())
}
