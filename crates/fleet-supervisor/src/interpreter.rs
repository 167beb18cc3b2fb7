// ABOUTME: Turns decoded worker events into status transitions and persistence writes.
// ABOUTME: Also runs the per-connection pipeline: frames in, events applied in arrival order.

use crate::worker::WorkerRecord;
use fleet_core::{SessionStatus, SessionStore};
use fleet_log::WORKER_TARGET;
use fleet_proto::prost::Message;
use fleet_proto::{worker_event::Event, ConnectionUpdate, FrameReader, WorkerEvent};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;

/// A frame that did not decode into a usable event.
#[derive(Error, Debug)]
pub enum MalformedEvent {
    #[error("invalid protobuf payload: {0}")]
    Decode(#[from] fleet_proto::prost::DecodeError),

    #[error("event envelope carries no event")]
    Empty,
}

pub fn decode_event(payload: &[u8]) -> Result<Event, MalformedEvent> {
    WorkerEvent::decode(payload)?
        .event
        .ok_or(MalformedEvent::Empty)
}

/// Result of folding one connection update into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub status: SessionStatus,
    /// The process must be stopped and never restarted.
    pub terminal: bool,
}

/// Fold a connection update into the record's state.
///
/// The phone carried in the update is informational; the record's own phone
/// is authoritative. Returns `None` once the record has been cleared.
pub fn apply_connection(record: &WorkerRecord, update: &ConnectionUpdate) -> Option<Transition> {
    let status = SessionStatus::parse(&update.status);
    let mut state = record.lock();
    if state.detached {
        return None;
    }
    match &status {
        SessionStatus::Pairing => {
            if let Some(code) = update.code() {
                state.pairing_code = Some(code.to_string());
            }
            state.transition(SessionStatus::Pairing);
        }
        other => state.transition(other.clone()),
    }

    Some(Transition {
        terminal: status.is_terminal(),
        status,
    })
}

/// Apply one decoded event: update the record, then persist before returning.
///
/// The record's persist lock is held from the status change through the
/// write, so a concurrent clear either runs first (and the event is dropped)
/// or deletes the row after this write lands.
pub async fn handle_event(record: &WorkerRecord, store: &dyn SessionStore, event: Event) {
    match event {
        Event::Connection(update) => {
            if !update.phone.is_empty() && update.phone != record.phone() {
                tracing::debug!(
                    phone = %record.phone(),
                    reported = %update.phone,
                    "Worker reported a different phone; using the supervised one"
                );
            }

            let _persist = record.persist_lock().await;
            let Some(transition) = apply_connection(record, &update) else {
                tracing::debug!(
                    phone = %record.phone(),
                    status = %update.status,
                    "Dropped status from a cleared worker"
                );
                return;
            };
            tracing::info!(phone = %record.phone(), status = %transition.status, "Worker status changed");

            if transition.terminal {
                record.request_stop();
            }

            // In-memory state stays authoritative if the write fails
            if let Err(e) = store.upsert(record.phone(), &transition.status).await {
                tracing::warn!(
                    phone = %record.phone(),
                    status = %transition.status,
                    error = %e,
                    "Failed to persist worker status"
                );
            }
        }
        Event::RawLog(line) => {
            tracing::info!(target: WORKER_TARGET, phone = %record.phone(), "{}", line);
        }
    }
}

/// Read frames until the stream ends, applying each event in order.
///
/// Returns the number of events applied.
pub async fn run_pipeline<R>(
    mut reader: FrameReader<R>,
    record: Arc<WorkerRecord>,
    store: Arc<dyn SessionStore>,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut applied = 0;
    while let Some(frame) = reader.next_frame().await {
        match decode_event(&frame) {
            Ok(event) => {
                handle_event(&record, store.as_ref(), event).await;
                applied += 1;
            }
            Err(e) => {
                tracing::debug!(phone = %record.phone(), len = frame.len(), error = %e, "Dropped malformed frame");
            }
        }
    }
    tracing::debug!(phone = %record.phone(), applied, "Worker event stream ended");
    applied
}
