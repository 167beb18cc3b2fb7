// ABOUTME: Shared types and configuration for the fleet supervisor.
// ABOUTME: Contains config parsing, the status model, and the durable/ephemeral stores.

pub mod config;
pub mod ephemeral;
pub mod error;
pub mod status;
pub mod store;

pub use config::{validate_phone, Config, EphemeralConfig, SupervisorConfig, WorkerConfig};
pub use ephemeral::{EphemeralStore, MemoryEphemeralStore, NoopEphemeralStore, RedisCliStore};
pub use error::{Result, StoreError};
pub use status::SessionStatus;
pub use store::{MemorySessionStore, SessionRow, SessionStore, SqliteSessionStore};
