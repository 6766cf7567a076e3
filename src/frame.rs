// HTTP/2 frame layer - typed frames and the wire enums they are built from.
//
// This module models RFC 7540 Section 4 (frame format) and Section 6 (frame
// definitions). It is deliberately separate from the transport codec: frame
// payloads are parsed from an already-delimited buffer, and the connection
// loop works exclusively with the typed `Frame` values defined here.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::io::Cursor;
use thiserror::Error;

/// Size of the fixed frame header (RFC 7540 Section 4.1).
pub const FRAME_HEADER_LEN: usize = 9;

/// SETTINGS_MAX_FRAME_SIZE initial value (RFC 7540 Section 6.5.2). This
/// server never advertises a larger value, so it is also the read-side cap.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;

/// Upper bound a peer may set SETTINGS_MAX_FRAME_SIZE to (2^24 - 1).
pub const MAX_ALLOWED_FRAME_SIZE: u32 = (1 << 24) - 1;

/// Initial flow-control window for new streams and the connection
/// (RFC 7540 Section 6.9.2).
pub const DEFAULT_INITIAL_WINDOW_SIZE: i32 = 65_535;

/// Largest legal flow-control window (2^31 - 1, RFC 7540 Section 6.9.1).
pub const MAX_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// Stream identifier: 31 bits on the wire, client-initiated ids are odd.
pub type StreamId = u32;

// Frame flags (RFC 7540 Section 6). Flag bits overlap between frame types;
// which constant applies depends on the frame.
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_ACK: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;
pub const FLAG_PADDED: u8 = 0x8;
pub const FLAG_PRIORITY: u8 = 0x20;

/// HTTP/2 Frame Types (RFC 7540 Section 6)
///
/// The 8-bit type field of the frame header. Types outside this set must be
/// ignored per Section 4.1, which the parser models with `Frame::Unknown`.
#[derive(TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// DATA (Section 6.1) - request/response body bytes
    Data = 0x0,
    /// HEADERS (Section 6.2) - opens a stream, carries a header block fragment
    Headers = 0x1,
    /// PRIORITY (Section 6.3) - stream dependency advice
    Priority = 0x2,
    /// RST_STREAM (Section 6.4) - abnormal stream termination
    RstStream = 0x3,
    /// SETTINGS (Section 6.5) - connection configuration
    Settings = 0x4,
    /// PUSH_PROMISE (Section 6.6) - server push (not supported here)
    PushPromise = 0x5,
    /// PING (Section 6.7) - liveness check, echoed with ACK
    Ping = 0x6,
    /// GOAWAY (Section 6.8) - connection shutdown
    GoAway = 0x7,
    /// WINDOW_UPDATE (Section 6.9) - flow-control credit grant
    WindowUpdate = 0x8,
    /// CONTINUATION (Section 6.10) - continues a header block
    Continuation = 0x9,
}

/// HTTP/2 Error Codes (RFC 7540 Section 7)
///
/// Carried in RST_STREAM and GOAWAY frames. The full vocabulary is defined
/// even though this server actively emits only a handful of codes.
#[derive(TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Graceful shutdown, no error
    NoError = 0x0,
    /// Detected an unspecific protocol violation
    ProtocolError = 0x1,
    /// Unexpected internal failure
    InternalError = 0x2,
    /// Flow-control window was violated
    FlowControlError = 0x3,
    /// SETTINGS ACK not received in time
    SettingsTimeout = 0x4,
    /// Frame received on an already-closed stream
    StreamClosed = 0x5,
    /// Frame size was invalid for its type
    FrameSizeError = 0x6,
    /// Stream declined before any application processing
    RefusedStream = 0x7,
    /// Stream no longer needed
    Cancel = 0x8,
    /// Header compression state cannot be maintained
    CompressionError = 0x9,
    /// CONNECT request failed
    ConnectError = 0xa,
    /// Peer is misbehaving; back off
    EnhanceYourCalm = 0xb,
    /// Transport security properties inadequate
    InadequateSecurity = 0xc,
    /// Request should be retried over HTTP/1.1
    Http11Required = 0xd,
}

/// SETTINGS parameter identifiers (RFC 7540 Section 6.5.2)
#[derive(TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingId {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

/// Errors produced while delimiting or parsing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("incomplete frame: need more data")]
    Incomplete,

    #[error("frame of {length} bytes exceeds the advertised maximum of {max}")]
    PayloadTooLarge { length: u32, max: u32 },

    #[error("padding length exceeds {frame} payload")]
    TooMuchPadding { frame: &'static str },

    #[error("{frame} payload shorter than its mandatory fields")]
    PayloadTooShort { frame: &'static str },

    #[error("{frame} payload must be {expected} bytes, got {actual}")]
    InvalidPayloadLength {
        frame: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("SETTINGS payload length {0} is not a multiple of 6")]
    PartialSetting(usize),

    #[error("SETTINGS ACK carried a payload")]
    SettingsAckWithPayload,

    #[error("{frame} frame sent on stream {stream_id}, must be stream 0")]
    NonZeroStream {
        frame: &'static str,
        stream_id: StreamId,
    },

    #[error("{frame} frame requires a nonzero stream id")]
    ZeroStream { frame: &'static str },

    #[error("connection preface mismatch")]
    BadPreface,

    #[error("connection reset by peer mid-frame")]
    TruncatedFrame,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// The fixed 9-byte frame header (RFC 7540 Section 4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: StreamId,
}

impl FrameHeader {
    /// Decode a frame header. The reserved high bit of the stream id is
    /// masked off as required by Section 4.1.
    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, FrameError> {
        if buf.remaining() < FRAME_HEADER_LEN {
            return Err(FrameError::Incomplete);
        }

        let length =
            ((buf.get_u8() as u32) << 16) | ((buf.get_u8() as u32) << 8) | buf.get_u8() as u32;
        let frame_type = buf.get_u8();
        let flags = buf.get_u8();
        let stream_id = buf.get_u32() & 0x7fff_ffff;

        Ok(FrameHeader {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((self.length >> 16) as u8);
        buf.put_u8((self.length >> 8) as u8);
        buf.put_u8(self.length as u8);
        buf.put_u8(self.frame_type);
        buf.put_u8(self.flags);
        buf.put_u32(self.stream_id & 0x7fff_ffff);
    }
}

/// A parsed HTTP/2 frame.
///
/// Header block fragments are carried opaquely; HPACK decoding happens in
/// the connection loop where the assembly record lives. Frames the server
/// only logs-and-ignores (`Priority`, `PushPromise`, `RstStream`, `GoAway`,
/// `Unknown`) keep just enough of their content for the log line.
#[derive(Debug, Clone)]
pub enum Frame {
    Data {
        stream_id: StreamId,
        data: Bytes,
        end_stream: bool,
    },
    Headers {
        stream_id: StreamId,
        fragment: Bytes,
        end_stream: bool,
        end_headers: bool,
    },
    Priority {
        stream_id: StreamId,
    },
    RstStream {
        stream_id: StreamId,
        code: u32,
    },
    Settings {
        ack: bool,
        settings: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: StreamId,
    },
    Ping {
        stream_id: StreamId,
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: StreamId,
        code: u32,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    Continuation {
        stream_id: StreamId,
        fragment: Bytes,
        end_headers: bool,
    },
    Unknown {
        frame_type: u8,
        stream_id: StreamId,
    },
}

impl Frame {
    /// Parse a frame from its header and exactly `header.length` payload
    /// bytes. Validation here covers only what can be judged from the frame
    /// in isolation (fixed sizes, padding arithmetic, mandatory stream-id
    /// zero/nonzero rules); everything that needs connection state is the
    /// loop's job.
    pub fn parse(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
        let frame_type = match FrameType::try_from(header.frame_type) {
            Ok(t) => t,
            Err(_) => {
                return Ok(Frame::Unknown {
                    frame_type: header.frame_type,
                    stream_id: header.stream_id,
                });
            }
        };

        match frame_type {
            FrameType::Data => {
                if header.stream_id == 0 {
                    return Err(FrameError::ZeroStream { frame: "DATA" });
                }
                let data = strip_padding(&header, payload, "DATA")?;
                Ok(Frame::Data {
                    stream_id: header.stream_id,
                    data,
                    end_stream: header.flags & FLAG_END_STREAM != 0,
                })
            }
            FrameType::Headers => {
                if header.stream_id == 0 {
                    return Err(FrameError::ZeroStream { frame: "HEADERS" });
                }
                let mut fragment = strip_padding(&header, payload, "HEADERS")?;
                // A PRIORITY flag prepends a 4-byte dependency and 1-byte
                // weight to the fragment (Section 6.2). Parsed past, unused.
                if header.flags & FLAG_PRIORITY != 0 {
                    if fragment.len() < 5 {
                        return Err(FrameError::PayloadTooShort { frame: "HEADERS" });
                    }
                    fragment.advance(5);
                }
                Ok(Frame::Headers {
                    stream_id: header.stream_id,
                    fragment,
                    end_stream: header.flags & FLAG_END_STREAM != 0,
                    end_headers: header.flags & FLAG_END_HEADERS != 0,
                })
            }
            FrameType::Priority => Ok(Frame::Priority {
                stream_id: header.stream_id,
            }),
            FrameType::RstStream => {
                if payload.len() != 4 {
                    return Err(FrameError::InvalidPayloadLength {
                        frame: "RST_STREAM",
                        expected: 4,
                        actual: payload.len(),
                    });
                }
                Ok(Frame::RstStream {
                    stream_id: header.stream_id,
                    code: payload.get_u32(),
                })
            }
            FrameType::Settings => {
                if header.stream_id != 0 {
                    return Err(FrameError::NonZeroStream {
                        frame: "SETTINGS",
                        stream_id: header.stream_id,
                    });
                }
                let ack = header.flags & FLAG_ACK != 0;
                if ack && !payload.is_empty() {
                    return Err(FrameError::SettingsAckWithPayload);
                }
                if payload.len() % 6 != 0 {
                    return Err(FrameError::PartialSetting(payload.len()));
                }
                let mut settings = Vec::with_capacity(payload.len() / 6);
                while payload.has_remaining() {
                    settings.push((payload.get_u16(), payload.get_u32()));
                }
                Ok(Frame::Settings { ack, settings })
            }
            FrameType::PushPromise => Ok(Frame::PushPromise {
                stream_id: header.stream_id,
            }),
            FrameType::Ping => {
                if payload.len() != 8 {
                    return Err(FrameError::InvalidPayloadLength {
                        frame: "PING",
                        expected: 8,
                        actual: payload.len(),
                    });
                }
                let mut opaque = [0u8; 8];
                payload.copy_to_slice(&mut opaque);
                Ok(Frame::Ping {
                    stream_id: header.stream_id,
                    ack: header.flags & FLAG_ACK != 0,
                    payload: opaque,
                })
            }
            FrameType::GoAway => {
                if header.stream_id != 0 {
                    return Err(FrameError::NonZeroStream {
                        frame: "GOAWAY",
                        stream_id: header.stream_id,
                    });
                }
                if payload.len() < 8 {
                    return Err(FrameError::PayloadTooShort { frame: "GOAWAY" });
                }
                let last_stream_id = payload.get_u32() & 0x7fff_ffff;
                let code = payload.get_u32();
                Ok(Frame::GoAway {
                    last_stream_id,
                    code,
                })
            }
            FrameType::WindowUpdate => {
                if payload.len() != 4 {
                    return Err(FrameError::InvalidPayloadLength {
                        frame: "WINDOW_UPDATE",
                        expected: 4,
                        actual: payload.len(),
                    });
                }
                Ok(Frame::WindowUpdate {
                    stream_id: header.stream_id,
                    increment: payload.get_u32() & 0x7fff_ffff,
                })
            }
            FrameType::Continuation => {
                if header.stream_id == 0 {
                    return Err(FrameError::ZeroStream {
                        frame: "CONTINUATION",
                    });
                }
                Ok(Frame::Continuation {
                    stream_id: header.stream_id,
                    fragment: payload,
                    end_headers: header.flags & FLAG_END_HEADERS != 0,
                })
            }
        }
    }

    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Data { .. } => "DATA",
            Frame::Headers { .. } => "HEADERS",
            Frame::Priority { .. } => "PRIORITY",
            Frame::RstStream { .. } => "RST_STREAM",
            Frame::Settings { .. } => "SETTINGS",
            Frame::PushPromise { .. } => "PUSH_PROMISE",
            Frame::Ping { .. } => "PING",
            Frame::GoAway { .. } => "GOAWAY",
            Frame::WindowUpdate { .. } => "WINDOW_UPDATE",
            Frame::Continuation { .. } => "CONTINUATION",
            Frame::Unknown { .. } => "UNKNOWN",
        }
    }
}

/// Remove PADDED framing: a 1-byte pad length followed by the payload and
/// that many trailing pad bytes (RFC 7540 Section 6.1). Padding at least as
/// long as the remaining payload is a protocol violation.
fn strip_padding(
    header: &FrameHeader,
    mut payload: Bytes,
    frame: &'static str,
) -> Result<Bytes, FrameError> {
    if header.flags & FLAG_PADDED == 0 {
        return Ok(payload);
    }
    if payload.is_empty() {
        return Err(FrameError::PayloadTooShort { frame });
    }
    let pad_len = payload.get_u8() as usize;
    if pad_len >= payload.len() + 1 {
        return Err(FrameError::TooMuchPadding { frame });
    }
    payload.truncate(payload.len() - pad_len);
    Ok(payload)
}
