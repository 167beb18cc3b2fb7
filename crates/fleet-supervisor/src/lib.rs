// ABOUTME: fleet supervisor library: worker registry, supervisor loops, event interpreter, admin API.
// ABOUTME: The fleetd binary is a thin CLI over run_serve, run_ctl, and run_init.

pub mod admin;
pub mod init;
pub mod interpreter;
pub mod registry;
pub mod supervisor;
pub mod worker;

pub use admin::{AdminClient, Request, Response};
pub use fleet_core::Config;
pub use init::run_init;
pub use registry::{ReconcileSummary, Registry, RegistryError};
pub use supervisor::{socket_path, SupervisorSettings, WorkerCommand};
pub use worker::{WorkerRecord, WorkerSnapshot};

use anyhow::{Context, Result};
use fleet_core::{
    EphemeralStore, MemorySessionStore, NoopEphemeralStore, RedisCliStore, SessionStore,
    SqliteSessionStore,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Options for running the daemon
pub struct ServeOptions {
    /// Path to configuration file
    pub config_path: Option<PathBuf>,
    /// Keep session status in memory instead of SQLite
    pub memory: bool,
}

/// Build a registry wired to the stores named in `config`.
pub async fn build_registry(config: &Config, memory: bool) -> Result<Registry> {
    let store: Arc<dyn SessionStore> = if memory {
        Arc::new(MemorySessionStore::new())
    } else {
        let path = config.database_path_expanded();
        Arc::new(
            SqliteSessionStore::open(&path)
                .await
                .with_context(|| format!("Failed to open session database {}", path.display()))?
                .with_tenant_tables(config.tenant_tables.clone()),
        )
    };

    let ephemeral: Arc<dyn EphemeralStore> = if config.ephemeral.enabled {
        Arc::new(RedisCliStore::new(
            config.ephemeral.redis_cli.clone(),
            config.ephemeral.url.clone(),
        ))
    } else {
        Arc::new(NoopEphemeralStore)
    };

    let settings = SupervisorSettings::from_config(config);
    std::fs::create_dir_all(&settings.socket_dir).with_context(|| {
        format!(
            "Failed to create socket directory {}",
            settings.socket_dir.display()
        )
    })?;

    Ok(Registry::new(
        store,
        ephemeral,
        WorkerCommand::from_config(&config.worker),
        settings,
    ))
}

/// Run the daemon until ctrl-c
pub async fn run_serve(options: ServeOptions) -> Result<()> {
    let config_path = options.config_path.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)?;
    tracing::info!(config = %config_path.display(), memory = options.memory, "Starting fleetd");

    let registry = build_registry(&config, options.memory).await?;
    let shutdown = registry.shutdown_token();

    let admin_path = config.admin_socket_path();
    let admin = tokio::spawn(admin::run_admin_server(
        admin_path,
        registry.clone(),
        shutdown.clone(),
    ));

    registry
        .reconcile()
        .await
        .context("Failed to load stored sessions")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    registry.shutdown().await;
    match admin.await {
        Ok(result) => result?,
        Err(e) => tracing::warn!(error = %e, "Admin server task failed"),
    }
    Ok(())
}

/// Send one admin request to a running daemon and print the reply as JSON.
pub async fn run_ctl(config_path: Option<PathBuf>, request: Request) -> Result<()> {
    let config_path = config_path.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)?;

    let mut client = AdminClient::connect(&config.admin_socket_path()).await?;
    let response = client.request(&request).await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        anyhow::bail!(
            "{}",
            response.error.unwrap_or_else(|| "request failed".to_string())
        );
    }
    Ok(())
}
