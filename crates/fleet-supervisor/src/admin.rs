// ABOUTME: Unix socket admin API for the running daemon, one JSON object per line.
// ABOUTME: Exposes worker operations and stored-session queries over the registry, plus a client.

use crate::registry::{Registry, RegistryError};
use crate::worker::WorkerSnapshot;
use anyhow::{Context, Result};
use fleet_core::{SessionRow, SessionStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    Start { phone: String },
    Pause { phone: String },
    Resume { phone: String },
    Reset { phone: String },
    Clear { phone: String },
    Inspect { phone: String },
    List,
    /// Durable row for one phone, whether or not a worker is registered.
    Session { phone: String },
    /// Every durable session row.
    Sessions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<Vec<WorkerSnapshot>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sessions: Option<Vec<SessionRow>>,
}

impl Response {
    fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    fn with_worker(worker: WorkerSnapshot) -> Self {
        Self {
            success: true,
            worker: Some(worker),
            ..Self::default()
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Serve admin requests on `path` until `shutdown` fires.
pub async fn run_admin_server(
    path: PathBuf,
    registry: Registry,
    shutdown: CancellationToken,
) -> Result<()> {
    // Remove existing socket
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)
        .with_context(|| format!("Failed to bind admin socket {}", path.display()))?;
    tracing::info!(path = %path.display(), "Admin socket listening");

    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.cancelled() => break,
        };
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, registry).await {
                tracing::warn!(error = %e, "Admin connection error");
            }
        });
    }

    let _ = std::fs::remove_file(&path);
    Ok(())
}

async fn handle_connection(stream: UnixStream, registry: Registry) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle_request(request, &registry).await,
            Err(e) => Response::failed(format!("invalid request: {}", e)),
        };
        let response_json = serde_json::to_string(&response)? + "\n";
        writer.write_all(response_json.as_bytes()).await?;
        line.clear();
    }

    Ok(())
}

pub async fn handle_request(request: Request, registry: &Registry) -> Response {
    tracing::debug!(?request, "Admin request");
    match request {
        Request::Start { phone } => match registry.start(&phone, SessionStatus::Starting).await {
            Ok(()) => match registry.get(&phone).await {
                Some(worker) => Response::with_worker(worker),
                None => Response::ok(),
            },
            Err(e) => Response::failed(e),
        },
        Request::Pause { phone } => reply(registry.pause(&phone).await),
        Request::Resume { phone } => reply(registry.resume(&phone).await),
        Request::Reset { phone } => match registry.reset(&phone).await {
            Ok(()) => Response::ok(),
            Err(e) => Response::failed(e),
        },
        Request::Clear { phone } => match registry.clear(&phone).await {
            Ok(()) => Response::ok(),
            Err(e) => Response::failed(e),
        },
        Request::Inspect { phone } => match registry.get(&phone).await {
            Some(worker) => Response::with_worker(worker),
            None => Response::failed(RegistryError::NotFound(phone)),
        },
        Request::List => Response {
            success: true,
            workers: Some(registry.list().await),
            ..Response::default()
        },
        Request::Session { phone } => match registry.stored_session(&phone).await {
            Ok(row) => Response {
                success: true,
                session: Some(row),
                ..Response::default()
            },
            Err(e) => Response::failed(e),
        },
        Request::Sessions => match registry.stored_sessions().await {
            Ok(rows) => Response {
                success: true,
                sessions: Some(rows),
                ..Response::default()
            },
            Err(e) => Response::failed(e),
        },
    }
}

fn reply(result: std::result::Result<WorkerSnapshot, RegistryError>) -> Response {
    match result {
        Ok(worker) => Response::with_worker(worker),
        Err(e) => Response::failed(e),
    }
}

/// Line-oriented client for the admin socket.
pub struct AdminClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl AdminClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path).await.with_context(|| {
            format!(
                "Failed to connect to {} (is `fleetd serve` running?)",
                path.display()
            )
        })?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(reader),
            writer,
        })
    }

    pub async fn request(&mut self, request: &Request) -> Result<Response> {
        let line = serde_json::to_string(request)? + "\n";
        self.writer.write_all(line.as_bytes()).await?;

        let mut reply = String::new();
        if self.reader.read_line(&mut reply).await? == 0 {
            anyhow::bail!("Admin socket closed before replying");
        }
        serde_json::from_str(&reply).context("Malformed admin response")
    }
}
