// ABOUTME: Transport codec for HTTP/2 - buffered frame reading and typed frame writing
// ABOUTME: Split into reader/writer halves so a dedicated task can read while the loop writes

use crate::frame::{
    Frame, FrameError, FrameHeader, FrameType, ErrorCode, StreamId, FLAG_ACK, FLAG_END_HEADERS,
    FLAG_END_STREAM, FRAME_HEADER_LEN,
};
use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

/// The fixed 24-byte client connection preface (RFC 7540 Section 3.5).
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Read half of the framer.
///
/// Owns the receive buffer and yields typed frames one at a time. The
/// connection keeps this half on a dedicated reader task; backpressure
/// between that task and the loop is the loop's business, not the codec's.
#[derive(Debug)]
pub struct FrameReader<R> {
    stream: R,

    // The buffer for reading frames.
    buffer: BytesMut,

    // Frames longer than this are a FRAME_SIZE_ERROR before their payload
    // is even buffered. Matches the SETTINGS_MAX_FRAME_SIZE we advertise.
    max_frame_size: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a new `FrameReader` backed by `stream`.
    pub fn new(stream: R, max_frame_size: u32) -> FrameReader<R> {
        FrameReader {
            stream,
            // One full default-sized frame plus its header fits without
            // reallocation; BytesMut grows if a peer legally sends more.
            buffer: BytesMut::with_capacity(16 * 1024),
            max_frame_size,
        }
    }

    /// Consume and verify the exact 24-byte client connection preface.
    ///
    /// A short read or any mismatching byte fails the handshake; nothing
    /// else is read past the preface.
    pub async fn read_preface(&mut self) -> Result<(), FrameError> {
        while self.buffer.len() < PREFACE.len() {
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return Err(FrameError::BadPreface);
            }
        }
        if &self.buffer[..PREFACE.len()] != PREFACE {
            return Err(FrameError::BadPreface);
        }
        self.buffer.advance(PREFACE.len());
        Ok(())
    }

    /// Read a single `Frame` from the underlying stream.
    ///
    /// Waits until enough data has been buffered to parse a complete frame.
    /// Data beyond the frame stays buffered for the next call.
    ///
    /// # Returns
    ///
    /// On success, the received frame. If the transport closes on a frame
    /// boundary, `None` (clean EOF). A close that splits a frame in half is
    /// an error.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            // Attempt to parse a frame from the buffered data. If enough
            // data has been buffered, the frame is returned.
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            // Not enough buffered data. `0` read bytes means end of stream.
            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(FrameError::TruncatedFrame)
                };
            }
        }
    }

    /// Try to parse one frame out of the buffer. `Ok(None)` means more data
    /// is needed; the length check runs before the payload is buffered so an
    /// oversized frame fails fast.
    fn parse_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut cursor = Cursor::new(&self.buffer[..]);
        let header = match FrameHeader::decode(&mut cursor) {
            Ok(header) => header,
            Err(FrameError::Incomplete) => return Ok(None),
            Err(e) => return Err(e),
        };

        if header.length > self.max_frame_size {
            return Err(FrameError::PayloadTooLarge {
                length: header.length,
                max: self.max_frame_size,
            });
        }

        let frame_len = FRAME_HEADER_LEN + header.length as usize;
        if self.buffer.len() < frame_len {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_LEN);
        let payload = self.buffer.split_to(header.length as usize).freeze();
        Frame::parse(header, payload).map(Some)
    }
}

/// Write half of the framer.
///
/// Exactly one task per connection (the loop) holds this; that single-writer
/// discipline is what keeps outbound frames ordered without locks. Writes go
/// through a `BufWriter` and each method flushes, so a frame is fully on the
/// wire when its `write_*` call returns.
#[derive(Debug)]
pub struct FrameWriter<W> {
    stream: BufWriter<W>,
    scratch: BytesMut,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream: W) -> FrameWriter<W> {
        FrameWriter {
            stream: BufWriter::new(stream),
            scratch: BytesMut::with_capacity(1024),
        }
    }

    fn start(&mut self, length: usize, frame_type: FrameType, flags: u8, stream_id: StreamId) {
        self.scratch.clear();
        FrameHeader {
            length: length as u32,
            frame_type: frame_type.into(),
            flags,
            stream_id,
        }
        .encode(&mut self.scratch);
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.stream.write_all(&self.scratch).await?;
        self.stream.flush().await
    }

    /// Write a SETTINGS frame with the given (identifier, value) pairs.
    pub async fn write_settings(&mut self, settings: &[(u16, u32)]) -> io::Result<()> {
        self.start(settings.len() * 6, FrameType::Settings, 0, 0);
        for &(id, value) in settings {
            self.scratch.extend_from_slice(&id.to_be_bytes());
            self.scratch.extend_from_slice(&value.to_be_bytes());
        }
        self.finish().await
    }

    /// Acknowledge the peer's SETTINGS frame.
    pub async fn write_settings_ack(&mut self) -> io::Result<()> {
        self.start(0, FrameType::Settings, FLAG_ACK, 0);
        self.finish().await
    }

    /// Write a PING frame carrying the 8 opaque payload bytes.
    pub async fn write_ping(&mut self, ack: bool, payload: [u8; 8]) -> io::Result<()> {
        self.start(8, FrameType::Ping, if ack { FLAG_ACK } else { 0 }, 0);
        self.scratch.extend_from_slice(&payload);
        self.finish().await
    }

    /// Grant `increment` bytes of flow-control credit on `stream_id`
    /// (0 for the connection-wide window).
    pub async fn write_window_update(
        &mut self,
        stream_id: StreamId,
        increment: u32,
    ) -> io::Result<()> {
        self.start(4, FrameType::WindowUpdate, 0, stream_id);
        self.scratch.extend_from_slice(&increment.to_be_bytes());
        self.finish().await
    }

    /// Abnormally terminate a stream.
    pub async fn write_rst_stream(
        &mut self,
        stream_id: StreamId,
        code: ErrorCode,
    ) -> io::Result<()> {
        self.start(4, FrameType::RstStream, 0, stream_id);
        self.scratch.extend_from_slice(&u32::from(code).to_be_bytes());
        self.finish().await
    }

    /// Announce connection shutdown.
    pub async fn write_goaway(
        &mut self,
        last_stream_id: StreamId,
        code: ErrorCode,
        debug_data: &[u8],
    ) -> io::Result<()> {
        self.start(8 + debug_data.len(), FrameType::GoAway, 0, 0);
        self.scratch.extend_from_slice(&last_stream_id.to_be_bytes());
        self.scratch.extend_from_slice(&u32::from(code).to_be_bytes());
        self.scratch.extend_from_slice(debug_data);
        self.finish().await
    }

    /// Write a HEADERS frame carrying an already-encoded header block
    /// fragment. The caller is responsible for keeping the fragment within
    /// the peer's max frame size and continuing with CONTINUATION frames.
    pub async fn write_headers(
        &mut self,
        stream_id: StreamId,
        fragment: &[u8],
        end_stream: bool,
        end_headers: bool,
    ) -> io::Result<()> {
        let mut flags = 0;
        if end_stream {
            flags |= FLAG_END_STREAM;
        }
        if end_headers {
            flags |= FLAG_END_HEADERS;
        }
        self.start(fragment.len(), FrameType::Headers, flags, stream_id);
        self.scratch.extend_from_slice(fragment);
        self.finish().await
    }

    /// Continue a header block started by a previous HEADERS frame.
    pub async fn write_continuation(
        &mut self,
        stream_id: StreamId,
        fragment: &[u8],
        end_headers: bool,
    ) -> io::Result<()> {
        let flags = if end_headers { FLAG_END_HEADERS } else { 0 };
        self.start(fragment.len(), FrameType::Continuation, flags, stream_id);
        self.scratch.extend_from_slice(fragment);
        self.finish().await
    }

    /// Put raw bytes on the wire. Tests use this to produce frames the
    /// typed writers refuse to build.
    #[cfg(test)]
    pub(crate) async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    /// Write a DATA frame. The caller has already spent flow-control credit
    /// for `data.len()` bytes and chunked to the peer's max frame size.
    pub async fn write_data(
        &mut self,
        stream_id: StreamId,
        data: &[u8],
        end_stream: bool,
    ) -> io::Result<()> {
        let flags = if end_stream { FLAG_END_STREAM } else { 0 };
        self.start(data.len(), FrameType::Data, flags, stream_id);
        self.scratch.extend_from_slice(data);
        self.finish().await
    }
}
