// ABOUTME: Length-prefixed framing: [u32 big-endian length][payload] repeated.
// ABOUTME: A short read anywhere ends the stream; it is never reported as corruption.

use std::io;

use futures::Stream;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::events::WorkerEvent;

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reads whole frame payloads from one connection.
///
/// Once the underlying stream ends (cleanly or mid-frame) the reader is
/// finished and every later call returns `None`.
pub struct FrameReader<R> {
    inner: R,
    max_frame_len: usize,
    finished: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            finished: false,
        }
    }

    /// Cap the payload size; an announced length above the cap ends the stream.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Whether the stream has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Read the next payload, or `None` once the connection is over.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.finished {
            return None;
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        if self.inner.read_exact(&mut header).await.is_err() {
            self.finished = true;
            return None;
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_len {
            tracing::warn!(
                len,
                max = self.max_frame_len,
                "Frame exceeds maximum length, closing stream"
            );
            self.finished = true;
            return None;
        }

        let mut payload = vec![0u8; len];
        if self.inner.read_exact(&mut payload).await.is_err() {
            self.finished = true;
            return None;
        }

        Some(payload)
    }

    /// Turn the reader into a lazy stream of payloads.
    pub fn into_stream(self) -> impl Stream<Item = Vec<u8>> {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next_frame().await.map(|frame| (frame, reader))
        })
    }
}

fn frame_header(len: usize) -> io::Result<[u8; FRAME_HEADER_LEN]> {
    let len = u32::try_from(len).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "payload too large for frame")
    })?;
    Ok(len.to_be_bytes())
}

/// Encode an event as a complete frame (prefix plus protobuf body).
pub fn encode_frame(event: &WorkerEvent) -> io::Result<Vec<u8>> {
    let body = event.encode_to_vec();
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&frame_header(body.len())?);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one raw payload as a frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(&frame_header(payload.len())?).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn framed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for p in payloads {
            out.extend_from_slice(&(p.len() as u32).to_be_bytes());
            out.extend_from_slice(p);
        }
        out
    }

    #[tokio::test]
    async fn test_reads_frames_in_order() {
        let bytes = framed(&[b"one", b"two", b"three"]);
        let mut reader = FrameReader::new(&bytes[..]);

        assert_eq!(reader.next_frame().await.unwrap(), b"one");
        assert_eq!(reader.next_frame().await.unwrap(), b"two");
        assert_eq!(reader.next_frame().await.unwrap(), b"three");
        assert!(reader.next_frame().await.is_none());
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn test_truncated_payload_ends_stream() {
        let mut bytes = framed(&[b"whole"]);
        bytes.extend_from_slice(&10u32.to_be_bytes());
        bytes.extend_from_slice(b"short");

        let frames: Vec<Vec<u8>> = FrameReader::new(&bytes[..]).into_stream().collect().await;
        assert_eq!(frames, vec![b"whole".to_vec()]);
    }

    #[tokio::test]
    async fn test_partial_prefix_ends_stream() {
        let mut bytes = framed(&[b"a"]);
        bytes.extend_from_slice(&[0x00, 0x00]);

        let mut reader = FrameReader::new(&bytes[..]);
        assert_eq!(reader.next_frame().await.unwrap(), b"a");
        assert!(reader.next_frame().await.is_none());
        // Not restartable
        assert!(reader.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_stream_yields_nothing() {
        let mut reader = FrameReader::new(&[][..]);
        assert!(reader.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_length_frame_is_yielded() {
        let bytes = framed(&[b"", b"x"]);
        let mut reader = FrameReader::new(&bytes[..]);
        assert_eq!(reader.next_frame().await.unwrap(), Vec::<u8>::new());
        assert_eq!(reader.next_frame().await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_oversized_frame_ends_stream() {
        let bytes = framed(&[b"0123456789"]);
        let mut reader = FrameReader::new(&bytes[..]).with_max_frame_len(4);
        assert!(reader.next_frame().await.is_none());
        assert!(reader.is_finished());
    }

    #[tokio::test]
    async fn test_write_then_read_over_duplex() {
        let (mut client, server) = tokio::io::duplex(64);
        let event = WorkerEvent::connection("15551234", "connected", None);

        tokio::spawn(async move {
            write_frame(&mut client, &event.encode_to_vec()).await.unwrap();
            write_frame(&mut client, b"not protobuf").await.unwrap();
        });

        let mut reader = FrameReader::new(server);
        let first = reader.next_frame().await.unwrap();
        assert_eq!(
            WorkerEvent::decode(&first[..]).unwrap(),
            WorkerEvent::connection("15551234", "connected", None)
        );
        assert_eq!(reader.next_frame().await.unwrap(), b"not protobuf");
        // Writer dropped, stream over
        assert!(reader.next_frame().await.is_none());
    }

    #[test]
    fn test_encode_frame_prefixes_length() {
        let event = WorkerEvent::raw_log("hi");
        let frame = encode_frame(&event).unwrap();
        let body_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(body_len, frame.len() - FRAME_HEADER_LEN);
        assert_eq!(WorkerEvent::decode(&frame[FRAME_HEADER_LEN..]).unwrap(), event);
    }
}
