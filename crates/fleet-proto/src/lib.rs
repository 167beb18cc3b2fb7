// ABOUTME: Re-exports the worker event messages and the frame codec.
// ABOUTME: Single source of truth for what travels over a worker socket.

pub mod events;
pub mod frame;

pub use events::{worker_event, ConnectionUpdate, WorkerEvent};
pub use frame::{encode_frame, write_frame, FrameReader, DEFAULT_MAX_FRAME_LEN, FRAME_HEADER_LEN};

// Re-export prost so consumers can call `Message::decode` without a direct dependency
pub use prost;
