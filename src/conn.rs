// ABOUTME: The per-connection engine - handshake, reader task, and the state-owning serve loop
// ABOUTME: The loop is the only writer of outbound frames and the only mutator of protocol state

use crate::body::{body_pipe, Body, BodyError, BODY_PIPE_CAPACITY};
use crate::codec::{FrameReader, FrameWriter};
use crate::flow::FlowWindow;
use crate::frame::{
    ErrorCode, Frame, FrameError, SettingId, StreamId, DEFAULT_INITIAL_WINDOW_SIZE,
    DEFAULT_MAX_FRAME_SIZE, MAX_ALLOWED_FRAME_SIZE, MAX_WINDOW_SIZE,
};
use crate::headers::{Disposition, HeaderAssembly, HeaderMap};
use crate::hpack;
use crate::request::{Request, TlsState};
use crate::response::ResponseWriter;
use crate::server::{Handler, ServerConfig};
use crate::stream::{PendingWrite, Stream};
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::mem;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// A header block (HEADERS plus CONTINUATIONs) may not accumulate past this
/// before the peer is cut off.
const MAX_HEADER_BLOCK_SIZE: usize = 1024 * 1024;

/// Outcome classification for everything that can go wrong while serving a
/// connection (RFC 7540 Section 5.4).
#[derive(Debug, Error)]
pub enum ConnError {
    /// The stream is reset with RST_STREAM and dropped; the connection
    /// continues.
    #[error("stream {stream_id} error: {code:?}")]
    Stream { stream_id: StreamId, code: ErrorCode },

    /// The connection terminates.
    #[error("connection error: {0:?}")]
    Connection(ErrorCode),

    /// The connection emits GOAWAY(FLOW_CONTROL_ERROR) and terminates.
    #[error("connection flow-control window violated")]
    GoAwayFlow,

    /// The prologue never completed; nothing HTTP/2 was spoken yet.
    #[error("connection handshake failed: {0}")]
    Handshake(&'static str),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameError> for ConnError {
    fn from(err: FrameError) -> ConnError {
        match err {
            FrameError::Io(e) => ConnError::Io(e),
            FrameError::TruncatedFrame => {
                ConnError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()))
            }
            FrameError::BadPreface => ConnError::Handshake("bad client preface"),
            FrameError::PayloadTooLarge { .. }
            | FrameError::PayloadTooShort { .. }
            | FrameError::InvalidPayloadLength { .. }
            | FrameError::PartialSetting(_)
            | FrameError::SettingsAckWithPayload => {
                ConnError::Connection(ErrorCode::FrameSizeError)
            }
            FrameError::Incomplete
            | FrameError::TooMuchPadding { .. }
            | FrameError::NonZeroStream { .. }
            | FrameError::ZeroStream { .. } => ConnError::Connection(ErrorCode::ProtocolError),
        }
    }
}

/// Errors in the "peer went away" family log at debug, everything else at
/// warn.
fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// A handler's request to serialize its response HEADERS. The loop answers
/// on `done` only after the block is on the wire; the response writer blocks
/// on that answer, which is the rendezvous keeping body bytes behind their
/// HEADERS.
#[derive(Debug)]
pub(crate) struct HeaderWrite {
    pub(crate) stream_id: StreamId,
    pub(crate) status: u16,
    pub(crate) headers: HeaderMap,
    pub(crate) end_stream: bool,
    pub(crate) done: oneshot::Sender<()>,
}

/// A handler's request to serialize response body bytes. `done` is answered
/// after the last byte is written, which may wait on flow-control credit.
#[derive(Debug)]
pub(crate) struct DataWrite {
    pub(crate) stream_id: StreamId,
    pub(crate) data: Bytes,
    pub(crate) end_stream: bool,
    pub(crate) done: oneshot::Sender<()>,
}

/// Consumed request-body bytes to hand back to the peer as WINDOW_UPDATEs.
#[derive(Debug)]
pub(crate) struct WindowCredit {
    pub(crate) stream_id: StreamId,
    pub(crate) bytes: u64,
}

/// Request from a handler's fault barrier to reset its stream.
#[derive(Debug)]
pub(crate) struct StreamReset {
    pub(crate) stream_id: StreamId,
    pub(crate) code: ErrorCode,
}

type FrameRx = mpsc::Receiver<(Frame, oneshot::Sender<()>)>;

/// All mutable connection state. Owned by the serve loop; nothing else
/// reads or writes any of it.
struct Connection<T, H> {
    writer: FrameWriter<WriteHalf<T>>,
    handler: Arc<H>,
    config: ServerConfig,

    /// Largest client-initiated stream id ever observed.
    max_stream_id: StreamId,
    streams: HashMap<StreamId, Stream>,
    initial_window_size: i32,
    max_write_frame_size: usize,
    conn_flow: FlowWindow,
    sent_goaway: bool,

    /// In-flight header block, if any. While present, only CONTINUATION
    /// frames on its stream are legal.
    assembly: Option<HeaderAssembly>,

    /// lowercase wire name -> canonical display form
    canon_cache: HashMap<String, String>,

    hpack_decoder: hpack::Decoder,
    hpack_encoder: hpack::Encoder,
    encode_buf: Vec<u8>,

    header_tx: mpsc::Sender<HeaderWrite>,
    data_tx: mpsc::Sender<DataWrite>,
    credit_tx: mpsc::Sender<WindowCredit>,
    reset_tx: mpsc::Sender<StreamReset>,
}

/// Serve one established connection to completion.
pub(crate) async fn serve_connection<T, H>(
    io: T,
    config: ServerConfig,
    handler: Arc<H>,
) -> Result<(), ConnError>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    H: Handler,
{
    let (read_half, write_half) = tokio::io::split(io);
    let mut reader = FrameReader::new(read_half, DEFAULT_MAX_FRAME_SIZE);

    let (header_tx, header_rx) = mpsc::channel(1);
    let (data_tx, data_rx) = mpsc::channel(1);
    let (credit_tx, credit_rx) = mpsc::channel(8);
    let (reset_tx, reset_rx) = mpsc::channel(8);

    let mut conn = Connection {
        writer: FrameWriter::new(write_half),
        handler,
        config,
        max_stream_id: 0,
        streams: HashMap::new(),
        initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
        max_write_frame_size: DEFAULT_MAX_FRAME_SIZE as usize,
        conn_flow: FlowWindow::new(DEFAULT_INITIAL_WINDOW_SIZE),
        sent_goaway: false,
        assembly: None,
        canon_cache: HashMap::new(),
        hpack_decoder: hpack::Decoder::new(),
        hpack_encoder: hpack::Encoder::new(),
        encode_buf: Vec::with_capacity(512),
        header_tx,
        data_tx,
        credit_tx,
        reset_tx,
    };

    // Deterministic prologue: preface, the client's SETTINGS, then our own
    // SETTINGS and the acknowledgment, all before the reader task starts.
    conn.handshake(&mut reader).await?;

    let (frame_tx, frame_rx) = mpsc::channel(1);
    let (read_err_tx, read_err_rx) = mpsc::channel(1);
    let reader_task = tokio::spawn(read_frames(reader, frame_tx, read_err_tx));

    let result = conn
        .run(frame_rx, read_err_rx, header_rx, data_rx, credit_rx, reset_rx)
        .await;

    // Dropping the read half closes the transport for good; handlers still
    // running observe closed channels on their next write.
    reader_task.abort();

    match &result {
        Ok(()) => trace!("connection closed"),
        Err(ConnError::Io(err)) if is_disconnect(err) => debug!(%err, "peer disconnected"),
        Err(err) => warn!(%err, "connection terminated"),
    }
    result
}

/// The reader task: pulls frames one at a time and hands each to the loop,
/// waiting for the loop's completion signal before parsing the next. At
/// most one frame is ever in flight between the two.
async fn read_frames<R>(
    mut reader: FrameReader<R>,
    frame_tx: mpsc::Sender<(Frame, oneshot::Sender<()>)>,
    read_err_tx: mpsc::Sender<FrameError>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                let (done_tx, done_rx) = oneshot::channel();
                if frame_tx.send((frame, done_tx)).await.is_err() {
                    return;
                }
                if done_rx.await.is_err() {
                    return;
                }
            }
            // Clean EOF: closing the frame channel is the signal.
            Ok(None) => return,
            Err(err) => {
                let _ = read_err_tx.send(err).await;
                return;
            }
        }
    }
}

impl<T, H> Connection<T, H>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    H: Handler,
{
    async fn handshake(&mut self, reader: &mut FrameReader<tokio::io::ReadHalf<T>>) -> Result<(), ConnError> {
        reader.read_preface().await?;

        match reader.read_frame().await? {
            Some(Frame::Settings {
                ack: false,
                settings,
            }) => self.apply_settings(&settings)?,
            Some(_) => return Err(ConnError::Connection(ErrorCode::ProtocolError)),
            None => return Err(ConnError::Handshake("eof before client SETTINGS")),
        }

        self.writer.write_settings(&[]).await?;
        self.writer.write_settings_ack().await?;
        Ok(())
    }

    /// The event loop. Suspends only on the multi-way receive below and on
    /// framer writes.
    async fn run(
        &mut self,
        mut frame_rx: FrameRx,
        mut read_err_rx: mpsc::Receiver<FrameError>,
        mut header_rx: mpsc::Receiver<HeaderWrite>,
        mut data_rx: mpsc::Receiver<DataWrite>,
        mut credit_rx: mpsc::Receiver<WindowCredit>,
        mut reset_rx: mpsc::Receiver<StreamReset>,
    ) -> Result<(), ConnError> {
        loop {
            let step = tokio::select! {
                inbound = frame_rx.recv() => match inbound {
                    Some((frame, done)) => {
                        let result = self.dispatch(frame).await;
                        // Ack only after dispatch: the reader is then free
                        // to overwrite its parse state with the next frame.
                        let _ = done.send(());
                        result
                    }
                    None => {
                        // Reader exited: clean EOF, or a terminal error on
                        // the error channel.
                        return match read_err_rx.try_recv() {
                            Ok(err) => Err(ConnError::from(err)),
                            Err(_) => Ok(()),
                        };
                    }
                },
                Some(hw) = header_rx.recv() => self.handle_header_write(hw).await,
                Some(dw) = data_rx.recv() => self.handle_data_write(dw).await,
                Some(credit) = credit_rx.recv() => self.handle_credit(credit).await,
                Some(reset) = reset_rx.recv() => self.handle_reset(reset).await,
            };

            if let Err(err) = step {
                self.recover(err).await?;
            }
        }
    }

    /// Apply the error taxonomy: stream errors reset one stream and the
    /// loop continues; everything else terminates the connection (with a
    /// GOAWAY first for flow-control violations).
    async fn recover(&mut self, err: ConnError) -> Result<(), ConnError> {
        match err {
            ConnError::Stream { stream_id, code } => {
                debug!(stream_id, ?code, "resetting stream");
                self.reset_stream(stream_id, code).await
            }
            ConnError::GoAwayFlow => {
                self.sent_goaway = true;
                let _ = self
                    .writer
                    .write_goaway(self.max_stream_id, ErrorCode::FlowControlError, b"")
                    .await;
                Err(ConnError::GoAwayFlow)
            }
            err => Err(err),
        }
    }

    async fn dispatch(&mut self, frame: Frame) -> Result<(), ConnError> {
        trace!(frame = frame.name(), "dispatch");

        // While a header block is in flight, the peer may send nothing but
        // its CONTINUATIONs (RFC 7540 Section 6.10).
        if let Some(assembly) = &self.assembly {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == assembly.stream_id => {}
                _ => return Err(ConnError::Connection(ErrorCode::ProtocolError)),
            }
        }

        match frame {
            Frame::Settings { ack: true, .. } => Ok(()),
            Frame::Settings {
                ack: false,
                settings,
            } => {
                self.apply_settings(&settings)?;
                self.writer.write_settings_ack().await?;
                // A larger INITIAL_WINDOW_SIZE may have unparked writes.
                self.pump_all().await
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
            } => {
                self.recv_headers(stream_id, &fragment, end_stream, end_headers)
                    .await
            }
            Frame::Continuation {
                stream_id: _,
                fragment,
                end_headers,
            } => self.recv_continuation(&fragment, end_headers).await,
            Frame::Data {
                stream_id,
                data,
                end_stream,
            } => self.recv_data(stream_id, &data, end_stream).await,
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.recv_window_update(stream_id, increment).await,
            Frame::Ping {
                stream_id,
                ack,
                payload,
            } => {
                if ack {
                    return Ok(());
                }
                if stream_id != 0 {
                    return Err(ConnError::Connection(ErrorCode::ProtocolError));
                }
                self.writer.write_ping(true, payload).await?;
                Ok(())
            }
            Frame::RstStream { stream_id, code } => {
                debug!(stream_id, code, "ignoring RST_STREAM");
                Ok(())
            }
            Frame::Priority { stream_id } => {
                trace!(stream_id, "ignoring PRIORITY");
                Ok(())
            }
            Frame::PushPromise { stream_id } => {
                debug!(stream_id, "ignoring PUSH_PROMISE");
                Ok(())
            }
            Frame::GoAway {
                last_stream_id,
                code,
            } => {
                debug!(last_stream_id, code, "peer sent GOAWAY");
                Ok(())
            }
            Frame::Unknown {
                frame_type,
                stream_id,
            } => {
                trace!(frame_type, stream_id, "ignoring unknown frame type");
                Ok(())
            }
        }
    }

    fn apply_settings(&mut self, settings: &[(u16, u32)]) -> Result<(), ConnError> {
        for &(id, value) in settings {
            match SettingId::try_from(id) {
                Ok(SettingId::InitialWindowSize) => {
                    if value > MAX_WINDOW_SIZE {
                        return Err(ConnError::GoAwayFlow);
                    }
                    let delta = value as i64 - self.initial_window_size as i64;
                    self.initial_window_size = value as i32;
                    // The delta applies to every live stream's window
                    // (RFC 7540 Section 6.9.2); pushing any of them past
                    // the ceiling kills the connection.
                    for stream in self.streams.values_mut() {
                        if stream.flow.adjust(delta).is_err() {
                            return Err(ConnError::GoAwayFlow);
                        }
                    }
                }
                Ok(SettingId::MaxFrameSize) => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_ALLOWED_FRAME_SIZE).contains(&value) {
                        return Err(ConnError::Connection(ErrorCode::ProtocolError));
                    }
                    self.max_write_frame_size = value as usize;
                }
                Ok(SettingId::HeaderTableSize) => {
                    self.hpack_encoder.set_max_size(value as usize);
                }
                Ok(SettingId::EnablePush) => {
                    if value > 1 {
                        return Err(ConnError::Connection(ErrorCode::ProtocolError));
                    }
                }
                Ok(setting) => {
                    debug!(?setting, value, "setting acknowledged but unused");
                }
                Err(_) => {
                    trace!(id, value, "ignoring unknown setting");
                }
            }
        }
        Ok(())
    }

    async fn recv_headers(
        &mut self,
        stream_id: StreamId,
        fragment: &[u8],
        end_stream: bool,
        end_headers: bool,
    ) -> Result<(), ConnError> {
        let disposition = if self.sent_goaway {
            // After GOAWAY no new work is accepted, but the block must
            // still run through the decoder to keep the tables in sync.
            Disposition::Discard
        } else {
            if stream_id % 2 == 0 || stream_id <= self.max_stream_id {
                return Err(ConnError::Connection(ErrorCode::ProtocolError));
            }
            self.max_stream_id = stream_id;

            if self.config.max_streams > 0 && self.streams.len() >= self.config.max_streams {
                Disposition::Refuse
            } else {
                self.streams.insert(
                    stream_id,
                    Stream::new(stream_id, end_stream, self.initial_window_size),
                );
                Disposition::Dispatch
            }
        };

        let mut assembly = HeaderAssembly::new(stream_id, end_stream, disposition);
        assembly.push_fragment(fragment);
        self.assembly = Some(assembly);
        self.check_assembly_size()?;

        if end_headers {
            self.finish_assembly().await
        } else {
            Ok(())
        }
    }

    async fn recv_continuation(
        &mut self,
        fragment: &[u8],
        end_headers: bool,
    ) -> Result<(), ConnError> {
        // The dispatch pre-check guarantees the assembly exists and the
        // stream ids match; a stray CONTINUATION lands here.
        let Some(assembly) = &mut self.assembly else {
            return Err(ConnError::Connection(ErrorCode::ProtocolError));
        };
        assembly.push_fragment(fragment);
        self.check_assembly_size()?;

        if end_headers {
            self.finish_assembly().await
        } else {
            Ok(())
        }
    }

    fn check_assembly_size(&self) -> Result<(), ConnError> {
        match &self.assembly {
            Some(assembly) if assembly.fragment_len() > MAX_HEADER_BLOCK_SIZE => {
                Err(ConnError::Connection(ErrorCode::EnhanceYourCalm))
            }
            _ => Ok(()),
        }
    }

    /// END_HEADERS arrived: decode the accumulated block, validate it, and
    /// either dispatch a handler, refuse the stream, or discard.
    async fn finish_assembly(&mut self) -> Result<(), ConnError> {
        let Some(mut assembly) = self.assembly.take() else {
            return Ok(());
        };
        let stream_id = assembly.stream_id;
        let block = assembly.take_fragments();

        // Every field flows through the decoder even when the request is
        // going nowhere; skipping any would desync the shared tables.
        for field in self.hpack_decoder.decode(&block) {
            match field {
                Ok(field) => assembly.absorb(field, &mut self.canon_cache),
                Err(err) => {
                    warn!(stream_id, %err, "hpack decoding failed");
                    return Err(ConnError::Connection(ErrorCode::CompressionError));
                }
            }
        }

        match assembly.disposition {
            Disposition::Discard => return Ok(()),
            Disposition::Refuse => {
                debug!(stream_id, "refusing stream: max_streams reached");
                return Err(ConnError::Stream {
                    stream_id,
                    code: ErrorCode::RefusedStream,
                });
            }
            Disposition::Dispatch => {}
        }

        let end_stream = assembly.end_stream;
        let parts = match assembly.finish() {
            Ok(parts) => parts,
            Err(err) => {
                debug!(stream_id, %err, "rejecting malformed request");
                return Err(ConnError::Stream {
                    stream_id,
                    code: ErrorCode::ProtocolError,
                });
            }
        };

        let body = if end_stream {
            Body::empty()
        } else {
            let Some(stream) = self.streams.get_mut(&stream_id) else {
                return Ok(());
            };
            let (body_writer, body) =
                body_pipe(BODY_PIPE_CAPACITY, stream_id, self.credit_tx.clone());
            stream.body = Some(body_writer);
            stream.declared_body_bytes = parts.declared_body_bytes;
            body
        };

        let tls = (parts.scheme == "https").then(TlsState::h2);
        let request = Request {
            method: parts.method,
            path: parts.path,
            scheme: parts.scheme,
            authority: parts.authority,
            headers: parts.headers,
            body,
            tls,
        };

        self.spawn_handler(stream_id, request);
        Ok(())
    }

    /// One task per request. An inner task forms the fault barrier: a
    /// panicking handler surfaces as a JoinError there instead of taking
    /// the connection down, and its stream is reset.
    fn spawn_handler(&self, stream_id: StreamId, request: Request) {
        let handler = Arc::clone(&self.handler);
        let mut response = ResponseWriter::new(
            stream_id,
            self.header_tx.clone(),
            self.data_tx.clone(),
        );
        let reset_tx = self.reset_tx.clone();

        tokio::spawn(async move {
            let worker = tokio::spawn(async move {
                handler.handle(&mut response, request).await;
                response
            });
            match worker.await {
                Ok(response) => response.finish().await,
                Err(err) => {
                    if err.is_panic() {
                        warn!(stream_id, "handler panicked; resetting stream");
                    }
                    let _ = reset_tx
                        .send(StreamReset {
                            stream_id,
                            code: ErrorCode::InternalError,
                        })
                        .await;
                }
            }
        });
    }

    async fn recv_data(
        &mut self,
        stream_id: StreamId,
        data: &[u8],
        end_stream: bool,
    ) -> Result<(), ConnError> {
        let closed = ConnError::Stream {
            stream_id,
            code: ErrorCode::StreamClosed,
        };
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Err(closed);
        };
        if !stream.accepts_data() || stream.body.is_none() {
            return Err(closed);
        }

        let len = data.len() as u64;
        let declared = stream.declared_body_bytes;
        if declared >= 0 && stream.bytes_seen + len > declared as u64 {
            if let Some(mut body) = stream.body.take() {
                body.close(Err(BodyError::TooLong {
                    declared: declared as u64,
                }));
            }
            return Err(closed);
        }

        if let Some(body) = stream.body.as_mut() {
            body.write(data).await;
        }
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        stream.bytes_seen += len;

        if end_stream {
            let seen = stream.bytes_seen;
            if let Some(mut body) = stream.body.take() {
                if declared >= 0 && seen != declared as u64 {
                    body.close(Err(BodyError::TooShort {
                        declared: declared as u64,
                        actual: seen,
                    }));
                } else {
                    body.close(Ok(()));
                }
            }
            stream.close_remote();
            if stream.is_closed() {
                self.streams.remove(&stream_id);
            }
        }
        Ok(())
    }

    async fn recv_window_update(
        &mut self,
        stream_id: StreamId,
        increment: u32,
    ) -> Result<(), ConnError> {
        if stream_id == 0 {
            if increment == 0 {
                return Err(ConnError::Connection(ErrorCode::ProtocolError));
            }
            if self.conn_flow.increase(increment).is_err() {
                return Err(ConnError::GoAwayFlow);
            }
            return self.pump_all().await;
        }

        if increment == 0 {
            return Err(ConnError::Stream {
                stream_id,
                code: ErrorCode::ProtocolError,
            });
        }
        // Updates for unknown streams are legal noise: the stream may have
        // completed before the peer's grant arrived.
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            trace!(stream_id, "WINDOW_UPDATE for unknown stream");
            return Ok(());
        };
        if stream.flow.increase(increment).is_err() {
            return Err(ConnError::Stream {
                stream_id,
                code: ErrorCode::FlowControlError,
            });
        }
        self.pump_stream(stream_id).await
    }

    /// Serialize a handler's response HEADERS, splitting into CONTINUATION
    /// frames when the block exceeds the peer's frame size limit.
    async fn handle_header_write(&mut self, hw: HeaderWrite) -> Result<(), ConnError> {
        let HeaderWrite {
            stream_id,
            status,
            headers,
            end_stream,
            done,
        } = hw;
        if !self.streams.contains_key(&stream_id) {
            // Stream reset under the handler; the dropped `done` tells it.
            return Ok(());
        }

        self.encode_buf.clear();
        self.hpack_encoder
            .encode_field(b":status", status.to_string().as_bytes(), &mut self.encode_buf);
        for (name, values) in headers.iter() {
            let wire_name = name.to_ascii_lowercase();
            for value in values {
                self.hpack_encoder
                    .encode_field(wire_name.as_bytes(), value.as_bytes(), &mut self.encode_buf);
            }
        }

        let block = mem::take(&mut self.encode_buf);
        let limit = self.max_write_frame_size.max(1);
        let mut offset = 0;
        let mut first = true;
        while offset < block.len() {
            let end = (offset + limit).min(block.len());
            let last = end == block.len();
            if first {
                self.writer
                    .write_headers(stream_id, &block[offset..end], end_stream, last)
                    .await?;
                first = false;
            } else {
                self.writer
                    .write_continuation(stream_id, &block[offset..end], last)
                    .await?;
            }
            offset = end;
        }
        self.encode_buf = block;

        if end_stream {
            self.finish_send_side(stream_id);
        }
        let _ = done.send(());
        Ok(())
    }

    /// Park a handler's body write on its stream and push out as much as
    /// current windows allow.
    async fn handle_data_write(&mut self, dw: DataWrite) -> Result<(), ConnError> {
        let DataWrite {
            stream_id,
            data,
            end_stream,
            done,
        } = dw;
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            // Stream reset under the handler; drop `done`.
            return Ok(());
        };
        stream.pending_write = Some(PendingWrite {
            data,
            end_stream,
            done,
        });
        self.pump_stream(stream_id).await
    }

    /// Drive one stream's parked write forward under the stream and
    /// connection windows. Completes the write's `done` signal only once
    /// its last byte is serialized.
    async fn pump_stream(&mut self, stream_id: StreamId) -> Result<(), ConnError> {
        enum Step {
            Wait,
            Write {
                chunk: Bytes,
                end_stream: bool,
                completed: Option<(oneshot::Sender<()>, bool)>,
            },
        }

        loop {
            let step = {
                let Some(stream) = self.streams.get_mut(&stream_id) else {
                    return Ok(());
                };
                let Some(mut pending) = stream.pending_write.take() else {
                    return Ok(());
                };

                if pending.data.is_empty() {
                    // Bare end-of-stream marker from a finished handler.
                    Step::Write {
                        chunk: Bytes::new(),
                        end_stream: pending.end_stream,
                        completed: Some((pending.done, pending.end_stream)),
                    }
                } else {
                    let window = stream.flow.available().min(self.conn_flow.available()) as usize;
                    if window == 0 {
                        stream.pending_write = Some(pending);
                        Step::Wait
                    } else {
                        let n = window.min(pending.data.len()).min(self.max_write_frame_size);
                        let chunk = pending.data.split_to(n);
                        stream.flow.consume(n as u32);
                        self.conn_flow.consume(n as u32);

                        if pending.data.is_empty() {
                            let ended = pending.end_stream;
                            Step::Write {
                                chunk,
                                end_stream: ended,
                                completed: Some((pending.done, ended)),
                            }
                        } else {
                            stream.pending_write = Some(pending);
                            Step::Write {
                                chunk,
                                end_stream: false,
                                completed: None,
                            }
                        }
                    }
                }
            };

            match step {
                Step::Wait => return Ok(()),
                Step::Write {
                    chunk,
                    end_stream,
                    completed,
                } => {
                    self.writer.write_data(stream_id, &chunk, end_stream).await?;
                    if let Some((done, ended)) = completed {
                        let _ = done.send(());
                        if ended {
                            self.finish_send_side(stream_id);
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Retry every parked write; run after connection-window or
    /// INITIAL_WINDOW_SIZE growth.
    async fn pump_all(&mut self) -> Result<(), ConnError> {
        let mut parked: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, stream)| stream.pending_write.is_some())
            .map(|(&id, _)| id)
            .collect();
        parked.sort_unstable();
        for stream_id in parked {
            self.pump_stream(stream_id).await?;
        }
        Ok(())
    }

    /// Turn consumed body bytes into WINDOW_UPDATE credit for both the
    /// connection and the stream, splitting grants that exceed the legal
    /// maximum increment.
    async fn handle_credit(&mut self, credit: WindowCredit) -> Result<(), ConnError> {
        let mut remaining = credit.bytes;
        while remaining > 0 {
            let increment = remaining.min(MAX_WINDOW_SIZE as u64) as u32;
            self.writer.write_window_update(0, increment).await?;
            self.writer
                .write_window_update(credit.stream_id, increment)
                .await?;
            remaining -= increment as u64;
        }
        Ok(())
    }

    async fn handle_reset(&mut self, reset: StreamReset) -> Result<(), ConnError> {
        if self.streams.contains_key(&reset.stream_id) {
            self.reset_stream(reset.stream_id, reset.code).await?;
        }
        Ok(())
    }

    /// Write RST_STREAM and drop every trace of the stream. The body pipe
    /// (if any) reports the reset to its reader; a parked write's dropped
    /// completion signal reports it to the response writer.
    async fn reset_stream(&mut self, stream_id: StreamId, code: ErrorCode) -> Result<(), ConnError> {
        self.writer.write_rst_stream(stream_id, code).await?;
        if let Some(mut stream) = self.streams.remove(&stream_id) {
            if let Some(mut body) = stream.body.take() {
                body.close(Err(BodyError::StreamReset { code }));
            }
            stream.pending_write.take();
        }
        Ok(())
    }

    /// Our direction of the stream ended (END_STREAM serialized).
    fn finish_send_side(&mut self, stream_id: StreamId) {
        let closed = match self.streams.get_mut(&stream_id) {
            Some(stream) => {
                stream.close_local();
                stream.is_closed()
            }
            None => false,
        };
        if closed {
            self.streams.remove(&stream_id);
        }
    }
}
