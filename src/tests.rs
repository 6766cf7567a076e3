//! End-to-end tests: a scripted client drives a real `serve` task over an
//! in-memory duplex transport and asserts on the exact frames coming back.

use crate::body::BodyError;
use crate::codec::{FrameReader, FrameWriter, PREFACE};
use crate::conn::ConnError;
use crate::frame::{ErrorCode, Frame, DEFAULT_MAX_FRAME_SIZE};
use crate::hpack::{self, HeaderField};
use crate::server::{serve, Handler, ServerBuilder, ServerConfig};
use crate::{Request, ResponseWriter};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const GET: &[(&str, &str)] = &[
    (":method", "GET"),
    (":scheme", "https"),
    (":path", "/"),
    (":authority", "x"),
];

/// What a handler saw, reported back to the test.
#[derive(Debug)]
struct Observed {
    method: String,
    path: String,
    scheme: String,
    authority: String,
    protocol: String,
    has_tls: bool,
    cookie: Option<String>,
    content_type: Option<String>,
    body: Result<Vec<u8>, BodyError>,
}

/// Records every request it sees and responds with the default empty 200.
struct Recording {
    tx: mpsc::UnboundedSender<Observed>,
}

impl Handler for Recording {
    async fn handle(&self, _response: &mut ResponseWriter, mut request: Request) {
        let body = request.body_mut().read_to_end().await;
        let _ = self.tx.send(Observed {
            method: request.method().to_string(),
            path: request.path().to_string(),
            scheme: request.scheme().to_string(),
            authority: request.authority().to_string(),
            protocol: request.protocol().to_string(),
            has_tls: request.tls().is_some(),
            cookie: request.headers().get("Cookie").map(str::to_string),
            content_type: request.headers().get("Content-Type").map(str::to_string),
            body,
        });
    }
}

fn recording() -> (Recording, mpsc::UnboundedReceiver<Observed>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recording { tx }, rx)
}

/// The scripted peer: raw frame I/O plus its own HPACK state.
struct TestClient {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    encoder: hpack::Encoder,
    decoder: hpack::Decoder,
}

struct ResponseHead {
    status: u16,
    fields: Vec<HeaderField>,
    end_stream: bool,
}

impl ResponseHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name.as_bytes())
            .and_then(|f| std::str::from_utf8(&f.value).ok())
    }
}

impl TestClient {
    async fn connect<H: Handler>(handler: H) -> (TestClient, JoinHandle<crate::Result<()>>) {
        Self::connect_with(ServerConfig::default(), handler).await
    }

    async fn connect_with<H: Handler>(
        config: ServerConfig,
        handler: H,
    ) -> (TestClient, JoinHandle<crate::Result<()>>) {
        let (mut client_io, server_io) = tokio::io::duplex(256 * 1024);
        let server = tokio::spawn(serve(server_io, config, Arc::new(handler)));

        client_io.write_all(PREFACE).await.unwrap();
        let (read_half, write_half) = tokio::io::split(client_io);
        let mut client = TestClient {
            reader: FrameReader::new(read_half, DEFAULT_MAX_FRAME_SIZE),
            writer: FrameWriter::new(write_half),
            encoder: hpack::Encoder::new(),
            decoder: hpack::Decoder::new(),
        };

        client.writer.write_settings(&[]).await.unwrap();
        // The server's prologue: its own SETTINGS, then the ack of ours.
        match client.read_frame().await {
            Frame::Settings { ack: false, .. } => {}
            other => panic!("expected server SETTINGS, got {other:?}"),
        }
        match client.read_frame().await {
            Frame::Settings { ack: true, .. } => {}
            other => panic!("expected SETTINGS ack, got {other:?}"),
        }
        (client, server)
    }

    async fn read_frame(&mut self) -> Frame {
        self.reader
            .read_frame()
            .await
            .unwrap()
            .expect("unexpected EOF from server")
    }

    async fn read_eof(&mut self) {
        loop {
            match self.reader.read_frame().await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(err) => panic!("expected clean EOF, got {err:?}"),
            }
        }
    }

    fn encode_fields(&mut self, fields: &[(&str, &str)]) -> Vec<u8> {
        let mut block = Vec::new();
        for (name, value) in fields {
            self.encoder
                .encode_field(name.as_bytes(), value.as_bytes(), &mut block);
        }
        block
    }

    async fn send_headers(&mut self, stream_id: u32, fields: &[(&str, &str)], end_stream: bool) {
        let block = self.encode_fields(fields);
        self.writer
            .write_headers(stream_id, &block, end_stream, true)
            .await
            .unwrap();
    }

    async fn send_headers_split(
        &mut self,
        stream_id: u32,
        fields: &[(&str, &str)],
        end_stream: bool,
        split_at: usize,
    ) {
        let block = self.encode_fields(fields);
        let (first, rest) = block.split_at(split_at.min(block.len()));
        self.writer
            .write_headers(stream_id, first, end_stream, false)
            .await
            .unwrap();
        self.writer
            .write_continuation(stream_id, rest, true)
            .await
            .unwrap();
    }

    async fn send_data(&mut self, stream_id: u32, data: &[u8], end_stream: bool) {
        self.writer
            .write_data(stream_id, data, end_stream)
            .await
            .unwrap();
    }

    /// Read the response head, tolerating interleaved WINDOW_UPDATE frames
    /// and reassembling CONTINUATION-split blocks.
    async fn read_response_head(&mut self, stream_id: u32) -> ResponseHead {
        loop {
            match self.read_frame().await {
                Frame::WindowUpdate { .. } => continue,
                Frame::Headers {
                    stream_id: sid,
                    fragment,
                    end_stream,
                    end_headers,
                } => {
                    assert_eq!(sid, stream_id, "HEADERS for unexpected stream");
                    let mut block = fragment.to_vec();
                    let mut complete = end_headers;
                    while !complete {
                        match self.read_frame().await {
                            Frame::Continuation {
                                stream_id: cid,
                                fragment,
                                end_headers,
                            } => {
                                assert_eq!(cid, stream_id);
                                block.extend_from_slice(&fragment);
                                complete = end_headers;
                            }
                            other => panic!("expected CONTINUATION, got {other:?}"),
                        }
                    }
                    let fields: Vec<HeaderField> = self
                        .decoder
                        .decode(&block)
                        .collect::<Result<_, _>>()
                        .unwrap();
                    let status = fields
                        .iter()
                        .find(|f| f.name == b":status")
                        .and_then(|f| std::str::from_utf8(&f.value).ok())
                        .and_then(|s| s.parse().ok())
                        .expect("response carried no :status");
                    return ResponseHead {
                        status,
                        fields,
                        end_stream,
                    };
                }
                other => panic!("expected HEADERS, got {other:?}"),
            }
        }
    }

    /// Collect DATA payloads for a stream until END_STREAM.
    async fn read_response_body(&mut self, stream_id: u32) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            match self.read_frame().await {
                Frame::WindowUpdate { .. } => continue,
                Frame::Data {
                    stream_id: sid,
                    data,
                    end_stream,
                } => {
                    assert_eq!(sid, stream_id);
                    body.extend_from_slice(&data);
                    if end_stream {
                        return body;
                    }
                }
                other => panic!("expected DATA, got {other:?}"),
            }
        }
    }

    async fn expect_rst_stream(&mut self, stream_id: u32, code: ErrorCode) {
        loop {
            match self.read_frame().await {
                Frame::WindowUpdate { .. } => continue,
                Frame::RstStream {
                    stream_id: sid,
                    code: raw,
                } => {
                    assert_eq!(sid, stream_id);
                    assert_eq!(raw, u32::from(code));
                    return;
                }
                other => panic!("expected RST_STREAM, got {other:?}"),
            }
        }
    }

    async fn expect_goaway(&mut self, code: ErrorCode) {
        loop {
            match self.read_frame().await {
                Frame::WindowUpdate { .. } => continue,
                Frame::GoAway { code: raw, .. } => {
                    assert_eq!(raw, u32::from(code));
                    return;
                }
                other => panic!("expected GOAWAY, got {other:?}"),
            }
        }
    }
}

// Seed scenario 1: a clean GET produces the server prologue, then an empty
// 200 with END_STREAM, and the handler sees the request with immediate EOF.
#[tokio::test]
async fn clean_get() {
    let (handler, mut observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    client.send_headers(1, GET, true).await;

    let head = client.read_response_head(1).await;
    assert_eq!(head.status, 200);
    assert!(head.end_stream);

    let seen = observed.recv().await.unwrap();
    assert_eq!(seen.method, "GET");
    assert_eq!(seen.path, "/");
    assert_eq!(seen.authority, "x");
    assert_eq!(seen.protocol, "HTTP/2.0");
    assert!(seen.has_tls, "https scheme should carry a TLS state stub");
    assert_eq!(seen.body.unwrap(), b"");
}

// Seed scenario 2: POST with Content-Length 5 delivers exactly five bytes
// then EOF, replenishes both flow-control windows, and the connection keeps
// serving further streams.
#[tokio::test]
async fn post_with_matching_content_length() {
    let (handler, mut observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    let fields = [
        (":method", "POST"),
        (":scheme", "https"),
        (":path", "/upload"),
        (":authority", "x"),
        ("content-length", "5"),
    ];
    client.send_headers(1, &fields, false).await;
    client.send_data(1, b"hello", true).await;

    // The handler's body reads come back as WINDOW_UPDATE credit for the
    // connection and the stream; interleaving with the response HEADERS is
    // unspecified.
    let mut saw_conn_credit = 0u64;
    let mut saw_stream_credit = 0u64;
    let mut status = None;
    while saw_conn_credit < 5 || saw_stream_credit < 5 || status.is_none() {
        match client.read_frame().await {
            Frame::WindowUpdate {
                stream_id: 0,
                increment,
            } => saw_conn_credit += increment as u64,
            Frame::WindowUpdate {
                stream_id: 1,
                increment,
            } => saw_stream_credit += increment as u64,
            Frame::Headers {
                stream_id: 1,
                fragment,
                end_stream,
                ..
            } => {
                assert!(end_stream);
                let fields: Vec<HeaderField> = client
                    .decoder
                    .decode(&fragment)
                    .collect::<Result<_, _>>()
                    .unwrap();
                status = fields
                    .iter()
                    .find(|f| f.name == b":status")
                    .map(|f| f.value.clone());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!(status.as_deref(), Some(b"200".as_ref()));
    assert_eq!(observed.recv().await.unwrap().body.unwrap(), b"hello");

    // The stream closed cleanly; the connection still serves new streams.
    client.send_headers(3, GET, true).await;
    assert_eq!(client.read_response_head(3).await.status, 200);
}

// Seed scenario 3: a body shorter than its declared Content-Length reports
// a terminal error naming declared and actual counts.
#[tokio::test]
async fn post_with_short_body() {
    let (handler, mut observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    let fields = [
        (":method", "POST"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "x"),
        ("content-length", "5"),
    ];
    client.send_headers(1, &fields, false).await;
    client.send_data(1, b"hi", true).await;

    let seen = observed.recv().await.unwrap();
    assert_eq!(
        seen.body,
        Err(BodyError::TooShort {
            declared: 5,
            actual: 2
        })
    );
}

// A body running past its declared Content-Length resets the stream with
// STREAM_CLOSED; the body reader sees the failure and the connection lives.
#[tokio::test]
async fn post_body_longer_than_declared() {
    let (handler, mut observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    let fields = [
        (":method", "POST"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "x"),
        ("content-length", "2"),
    ];
    client.send_headers(1, &fields, false).await;
    client.send_data(1, b"hello", true).await;

    client.expect_rst_stream(1, ErrorCode::StreamClosed).await;
    let seen = observed.recv().await.unwrap();
    assert_eq!(seen.body, Err(BodyError::TooLong { declared: 2 }));

    client.send_headers(3, GET, true).await;
    assert_eq!(client.read_response_head(3).await.status, 200);
}

// Seed scenario 4: a pseudo-header after a regular header resets the stream
// with PROTOCOL_ERROR; the connection survives.
#[tokio::test]
async fn pseudo_header_after_regular_resets_stream() {
    let (handler, _observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    let fields = [
        ("x-foo", "bar"),
        (":method", "GET"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "x"),
    ];
    client.send_headers(1, &fields, true).await;
    client.expect_rst_stream(1, ErrorCode::ProtocolError).await;

    client.send_headers(3, GET, true).await;
    assert_eq!(client.read_response_head(3).await.status, 200);
}

// Seed scenario 5: reusing a stream id is a connection-level protocol error.
#[tokio::test]
async fn reused_stream_id_terminates_connection() {
    let (handler, _observed) = recording();
    let (mut client, server) = TestClient::connect(handler).await;

    client.send_headers(3, GET, true).await;
    assert_eq!(client.read_response_head(3).await.status, 200);

    client.send_headers(3, GET, true).await;
    client.read_eof().await;
    assert!(matches!(
        server.await.unwrap(),
        Err(ConnError::Connection(ErrorCode::ProtocolError))
    ));
}

// Seed scenario 6: INITIAL_WINDOW_SIZE pushing a live stream's window past
// 2^31 - 1 draws GOAWAY(FLOW_CONTROL_ERROR).
#[tokio::test]
async fn settings_overflowing_a_stream_window() {
    let (handler, _observed) = recording();
    let (mut client, server) = TestClient::connect(handler).await;

    // Stream 1 stays open (no END_STREAM), window at the initial 65535.
    let fields = [
        (":method", "POST"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "x"),
    ];
    client.send_headers(1, &fields, false).await;
    // Raise it by 65535, then ask for the maximum initial window: the delta
    // would land the stream at 2^31 + 65534.
    client.writer.write_window_update(1, 65_535).await.unwrap();
    client
        .writer
        .write_settings(&[(4, 0x7fff_ffff)])
        .await
        .unwrap();

    client.expect_goaway(ErrorCode::FlowControlError).await;
    assert!(matches!(server.await.unwrap(), Err(ConnError::GoAwayFlow)));
}

// Boundary: INITIAL_WINDOW_SIZE of 2^31 itself is illegal.
#[tokio::test]
async fn initial_window_size_above_maximum() {
    let (handler, _observed) = recording();
    let (mut client, server) = TestClient::connect(handler).await;

    client
        .writer
        .write_settings(&[(4, 0x8000_0000)])
        .await
        .unwrap();

    client.expect_goaway(ErrorCode::FlowControlError).await;
    assert!(matches!(server.await.unwrap(), Err(ConnError::GoAwayFlow)));
}

// Boundary: client-initiated stream ids must be odd.
#[tokio::test]
async fn even_stream_id_terminates_connection() {
    let (handler, _observed) = recording();
    let (mut client, server) = TestClient::connect(handler).await;

    client.send_headers(2, GET, true).await;
    client.read_eof().await;
    assert!(matches!(
        server.await.unwrap(),
        Err(ConnError::Connection(ErrorCode::ProtocolError))
    ));
}

// Boundary: stream ids must increase.
#[tokio::test]
async fn decreasing_stream_id_terminates_connection() {
    let (handler, _observed) = recording();
    let (mut client, server) = TestClient::connect(handler).await;

    client.send_headers(5, GET, true).await;
    assert_eq!(client.read_response_head(5).await.status, 200);

    client.send_headers(3, GET, true).await;
    client.read_eof().await;
    assert!(matches!(
        server.await.unwrap(),
        Err(ConnError::Connection(ErrorCode::ProtocolError))
    ));
}

// Boundary: while a header block is open, anything but its CONTINUATION is
// a connection error.
#[tokio::test]
async fn non_continuation_during_header_block() {
    let (handler, _observed) = recording();
    let (mut client, server) = TestClient::connect(handler).await;

    let block = client.encode_fields(GET);
    client
        .writer
        .write_headers(1, &block, true, false)
        .await
        .unwrap();
    client.writer.write_ping(false, [0; 8]).await.unwrap();

    client.read_eof().await;
    assert!(matches!(
        server.await.unwrap(),
        Err(ConnError::Connection(ErrorCode::ProtocolError))
    ));
}

// A request header block split across HEADERS + CONTINUATION still
// assembles into one request.
#[tokio::test]
async fn request_headers_split_across_continuation() {
    let (handler, mut observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    client.send_headers_split(1, GET, true, 3).await;
    assert_eq!(client.read_response_head(1).await.status, 200);
    assert_eq!(observed.recv().await.unwrap().method, "GET");
}

// PING frames echo their opaque payload back with ACK set.
#[tokio::test]
async fn ping_is_echoed_with_ack() {
    let (handler, _observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    client
        .writer
        .write_ping(false, [1, 2, 3, 4, 5, 6, 7, 8])
        .await
        .unwrap();
    match client.read_frame().await {
        Frame::Ping { ack, payload, .. } => {
            assert!(ack);
            assert_eq!(payload, [1, 2, 3, 4, 5, 6, 7, 8]);
        }
        other => panic!("expected PING ack, got {other:?}"),
    }
}

// Boundary: PING must ride stream 0.
#[tokio::test]
async fn ping_on_nonzero_stream_terminates_connection() {
    let (handler, _observed) = recording();
    let (mut client, server) = TestClient::connect(handler).await;

    // Hand-built PING header carrying stream id 1.
    let mut raw = vec![0, 0, 8, 0x6, 0, 0, 0, 0, 1];
    raw.extend_from_slice(&[0; 8]);
    client.writer.write_raw(&raw).await.unwrap();

    client.read_eof().await;
    assert!(matches!(
        server.await.unwrap(),
        Err(ConnError::Connection(ErrorCode::ProtocolError))
    ));
}

// PRIORITY and unknown frame types are logged and ignored.
#[tokio::test]
async fn priority_and_unknown_frames_are_ignored() {
    let (handler, _observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    client
        .writer
        .write_raw(&[0, 0, 5, 0x2, 0, 0, 0, 0, 1, 0, 0, 0, 0, 16])
        .await
        .unwrap();
    client
        .writer
        .write_raw(&[0, 0, 2, 0x77, 0, 0, 0, 0, 9, 0xaa, 0xbb])
        .await
        .unwrap();

    client.send_headers(1, GET, true).await;
    assert_eq!(client.read_response_head(1).await.status, 200);
}

// Cookie crumbs coalesce into one logical header; names canonicalize.
#[tokio::test]
async fn cookie_coalescing_and_canonical_names() {
    let (handler, mut observed) = recording();
    let (mut client, _server) = TestClient::connect(handler).await;

    let fields = [
        (":method", "GET"),
        (":scheme", "http"),
        (":path", "/"),
        (":authority", "x"),
        ("cookie", "a=1"),
        ("cookie", "b=2"),
        ("content-type", "text/plain"),
    ];
    client.send_headers(1, &fields, true).await;
    assert_eq!(client.read_response_head(1).await.status, 200);

    let seen = observed.recv().await.unwrap();
    assert_eq!(seen.cookie.as_deref(), Some("a=1; b=2"));
    assert_eq!(seen.content_type.as_deref(), Some("text/plain"));
    assert_eq!(seen.scheme, "http");
    assert!(!seen.has_tls);
}

/// Responds with an explicit status, headers, and a small body.
struct NotFound;

impl Handler for NotFound {
    async fn handle(&self, response: &mut ResponseWriter, _request: Request) {
        response.headers_mut().insert("Content-Type", "text/plain");
        let _ = response.set_status(404).await;
        let _ = response.write(b"nope").await;
    }
}

#[tokio::test]
async fn explicit_status_and_headers() {
    let (mut client, _server) = TestClient::connect(NotFound).await;

    client.send_headers(1, GET, true).await;
    let head = client.read_response_head(1).await;
    assert_eq!(head.status, 404);
    assert_eq!(head.header("content-type"), Some("text/plain"));
    assert!(!head.end_stream);
    assert_eq!(client.read_response_body(1).await, b"nope");
}

/// Writes `size` patterned bytes in a single call.
struct BigBody {
    size: usize,
}

impl Handler for BigBody {
    async fn handle(&self, response: &mut ResponseWriter, _request: Request) {
        let body: Vec<u8> = (0..self.size).map(|i| (i % 251) as u8).collect();
        let _ = response.write(&body).await;
    }
}

// A response larger than the send windows: the server writes exactly the
// available 65535 bytes in max-frame-size chunks, parks, and resumes when
// the client grants credit on both windows.
#[tokio::test]
async fn response_body_respects_flow_control() {
    const SIZE: usize = 100 * 1024;
    let (mut client, _server) = TestClient::connect(BigBody { size: SIZE }).await;

    client.send_headers(1, GET, true).await;
    let head = client.read_response_head(1).await;
    assert_eq!(head.status, 200);
    assert!(!head.end_stream);

    // First burst: both windows start at 65535.
    let mut received = Vec::new();
    while received.len() < 65_535 {
        match client.read_frame().await {
            Frame::Data {
                stream_id: 1,
                data,
                end_stream,
            } => {
                assert!(data.len() <= DEFAULT_MAX_FRAME_SIZE as usize);
                assert!(!end_stream);
                received.extend_from_slice(&data);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!(received.len(), 65_535, "server overran the send window");

    client.writer.write_window_update(0, 65_536).await.unwrap();
    client.writer.write_window_update(1, 65_536).await.unwrap();

    let rest = client.read_response_body(1).await;
    received.extend_from_slice(&rest);
    assert_eq!(received.len(), SIZE);
    let expected: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();
    assert_eq!(received, expected);
}

/// Sets a response header too large for a single frame.
struct WideHeaders;

impl Handler for WideHeaders {
    async fn handle(&self, response: &mut ResponseWriter, _request: Request) {
        let value: String = (0..60_000u32)
            .map(|i| char::from(b'a' + (i * 7 % 26) as u8))
            .collect();
        response.headers_mut().insert("X-Blob", value);
        let _ = response.write(b"ok").await;
    }
}

// Response header blocks over the peer's max frame size split across
// HEADERS + CONTINUATION.
#[tokio::test]
async fn oversized_response_headers_use_continuation() {
    let (mut client, _server) = TestClient::connect(WideHeaders).await;

    client.send_headers(1, GET, true).await;
    // read_response_head reassembles and fails loudly if the server did not
    // split the block; a 60k header cannot fit one 16384-byte frame.
    let head = client.read_response_head(1).await;
    assert_eq!(head.status, 200);
    assert_eq!(head.header("x-blob").map(str::len), Some(60_000));
    assert_eq!(client.read_response_body(1).await, b"ok");
}

/// Panics on one path, serves the other.
struct Flaky;

impl Handler for Flaky {
    async fn handle(&self, response: &mut ResponseWriter, request: Request) {
        if request.path() == "/boom" {
            panic!("handler blew up");
        }
        let _ = response.write(b"fine").await;
    }
}

// A panicking handler costs its stream an INTERNAL_ERROR reset, not the
// connection.
#[tokio::test]
async fn handler_panic_resets_stream_only() {
    let (mut client, _server) = TestClient::connect(Flaky).await;

    let fields = [
        (":method", "GET"),
        (":scheme", "https"),
        (":path", "/boom"),
        (":authority", "x"),
    ];
    client.send_headers(1, &fields, true).await;
    client.expect_rst_stream(1, ErrorCode::InternalError).await;

    client.send_headers(3, GET, true).await;
    assert_eq!(client.read_response_head(3).await.status, 200);
    assert_eq!(client.read_response_body(3).await, b"fine");
}

// The max_streams cap refuses surplus streams with REFUSED_STREAM while
// leaving existing streams and later capacity intact.
#[tokio::test]
async fn max_streams_refuses_excess_streams() {
    let (handler, mut observed) = recording();
    let config = ServerBuilder::new().max_streams(1).build();
    let (mut client, _server) = TestClient::connect_with(config, handler).await;

    // Stream 1 holds the only slot open by never finishing its body.
    let fields = [
        (":method", "POST"),
        (":scheme", "https"),
        (":path", "/"),
        (":authority", "x"),
    ];
    client.send_headers(1, &fields, false).await;

    client.send_headers(3, GET, true).await;
    client.expect_rst_stream(3, ErrorCode::RefusedStream).await;

    // Finish stream 1; its slot frees up for stream 5.
    client.send_data(1, b"", true).await;
    assert_eq!(client.read_response_head(1).await.status, 200);
    assert_eq!(observed.recv().await.unwrap().body.unwrap(), b"");

    client.send_headers(5, GET, true).await;
    assert_eq!(client.read_response_head(5).await.status, 200);
}
