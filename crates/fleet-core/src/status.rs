// ABOUTME: Session lifecycle status with an open passthrough variant.
// ABOUTME: Known statuses are typed; anything else a worker reports is kept verbatim.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Lifecycle status of a worker session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    #[default]
    Starting,
    Pairing,
    Active,
    Paused,
    /// Terminal: the worker is torn down and never restarted.
    LoggedOut,
    /// Status string reported by a worker that this supervisor doesn't know.
    Other(String),
}

impl SessionStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "starting" => Self::Starting,
            "pairing" => Self::Pairing,
            "active" => Self::Active,
            "paused" => Self::Paused,
            "logged_out" => Self::LoggedOut,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Starting => "starting",
            Self::Pairing => "pairing",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::LoggedOut => "logged_out",
            Self::Other(s) => s,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for SessionStatus {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl Serialize for SessionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SessionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}
