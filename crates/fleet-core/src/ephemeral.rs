// ABOUTME: Ephemeral session store holding a worker's cached quick-session keys
// ABOUTME: Keys are `sessions:<phone>` and `session:<phone>:*`; cleared on reset and clear

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use tokio::process::Command;

/// Keys deleted per DEL invocation when flushing a pattern.
const DEL_BATCH: usize = 500;

/// Key holding the worker's quick-session blob.
pub fn quick_session_key(phone: &str) -> String {
    format!("sessions:{}", phone)
}

/// Scan pattern matching every per-session key of a worker.
pub fn session_key_pattern(phone: &str) -> String {
    format!("session:{}:*", phone)
}

/// Fast external store used by workers for cache data.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Delete only the quick-session key, forcing a fresh pairing handshake.
    async fn clear_quick_session(&self, phone: &str) -> Result<()>;

    /// Delete the quick-session key and every per-session key.
    async fn clear_all(&self, phone: &str) -> Result<()>;
}

/// Drives the `redis-cli` binary.
pub struct RedisCliStore {
    binary: String,
    url: Option<String>,
}

impl RedisCliStore {
    pub fn new(binary: impl Into<String>, url: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            url,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        if let Some(url) = &self.url {
            cmd.arg("-u").arg(url);
        }
        let output = cmd
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(StoreError::Ephemeral(format!(
                "{} {} failed ({}): {}",
                self.binary,
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl EphemeralStore for RedisCliStore {
    async fn clear_quick_session(&self, phone: &str) -> Result<()> {
        self.run(&["DEL", &quick_session_key(phone)]).await?;
        Ok(())
    }

    async fn clear_all(&self, phone: &str) -> Result<()> {
        self.clear_quick_session(phone).await?;

        let pattern = session_key_pattern(phone);
        let listing = self.run(&["--scan", "--pattern", &pattern]).await?;
        let keys: Vec<&str> = listing
            .lines()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect();

        for batch in keys.chunks(DEL_BATCH) {
            let mut args = Vec::with_capacity(batch.len() + 1);
            args.push("DEL");
            args.extend_from_slice(batch);
            self.run(&args).await?;
        }

        tracing::debug!(phone = %phone, keys = keys.len(), "Flushed ephemeral session keys");
        Ok(())
    }
}

/// In-process key set with the same deletion semantics, for tests.
#[derive(Default)]
pub struct MemoryEphemeralStore {
    keys: Mutex<BTreeSet<String>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into());
    }

    pub fn keys(&self) -> Vec<String> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EphemeralStore for MemoryEphemeralStore {
    async fn clear_quick_session(&self, phone: &str) -> Result<()> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&quick_session_key(phone));
        Ok(())
    }

    async fn clear_all(&self, phone: &str) -> Result<()> {
        let prefix = format!("session:{}:", phone);
        let quick = quick_session_key(phone);
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|k| *k != quick && !k.starts_with(&prefix));
        Ok(())
    }
}

/// Used when the ephemeral store is disabled in configuration.
pub struct NoopEphemeralStore;

#[async_trait]
impl EphemeralStore for NoopEphemeralStore {
    async fn clear_quick_session(&self, _phone: &str) -> Result<()> {
        Ok(())
    }

    async fn clear_all(&self, _phone: &str) -> Result<()> {
        Ok(())
    }
}
