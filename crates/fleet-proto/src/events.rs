// ABOUTME: Protobuf messages emitted by worker processes (whatsaly.WorkerEvent).
// ABOUTME: Hand-derived prost types so no protoc is needed at build time.

/// Connection lifecycle update reported by a worker.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ConnectionUpdate {
    /// Phone the worker believes it is serving.
    #[prost(string, tag = "1")]
    pub phone: String,
    /// Raw status string, e.g. "connected", "pairing", "logged_out".
    #[prost(string, tag = "2")]
    pub status: String,
    /// QR payload, used as a pairing code fallback.
    #[prost(string, optional, tag = "3")]
    pub qr: Option<String>,
    /// Short-lived pairing code.
    #[prost(string, optional, tag = "4")]
    pub pairing_code: Option<String>,
}

impl ConnectionUpdate {
    /// The pairing code carried by this update, falling back to the QR payload.
    ///
    /// Empty strings count as absent.
    pub fn code(&self) -> Option<&str> {
        self.pairing_code
            .as_deref()
            .filter(|c| !c.is_empty())
            .or_else(|| self.qr.as_deref().filter(|c| !c.is_empty()))
    }
}

/// Envelope for everything a worker sends over its socket.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkerEvent {
    #[prost(oneof = "worker_event::Event", tags = "1, 2")]
    pub event: Option<worker_event::Event>,
}

pub mod worker_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Event {
        #[prost(message, tag = "1")]
        Connection(super::ConnectionUpdate),
        #[prost(string, tag = "2")]
        RawLog(String),
    }
}

impl WorkerEvent {
    /// Build a connection update event.
    pub fn connection(
        phone: impl Into<String>,
        status: impl Into<String>,
        pairing_code: Option<String>,
    ) -> Self {
        Self {
            event: Some(worker_event::Event::Connection(ConnectionUpdate {
                phone: phone.into(),
                status: status.into(),
                qr: None,
                pairing_code,
            })),
        }
    }

    /// Build a raw log line event.
    pub fn raw_log(line: impl Into<String>) -> Self {
        Self {
            event: Some(worker_event::Event::RawLog(line.into())),
        }
    }
}
