// ABOUTME: Bounded in-memory pipe carrying request body bytes from the loop to a handler
// ABOUTME: Close carries clean EOF or a terminal error; reads drain the buffer first

use crate::conn::WindowCredit;
use crate::frame::{ErrorCode, StreamId};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// Ring capacity for request bodies. Deliberately one byte larger than the
/// initial flow-control window: the peer can never have more than 65535
/// unacknowledged bytes in flight, so the loop-side producer never blocks.
pub(crate) const BODY_PIPE_CAPACITY: usize = 64 * 1024;

/// Terminal status of a request body that did not end in clean EOF.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BodyError {
    #[error("request body exceeds declared content-length of {declared}")]
    TooLong { declared: u64 },

    #[error("request body ended early: declared {declared} bytes, received {actual}")]
    TooShort { declared: u64, actual: u64 },

    #[error("stream reset ({code:?})")]
    StreamReset { code: ErrorCode },

    #[error("connection closed before request body completed")]
    ConnectionClosed,
}

#[derive(Debug)]
struct PipeState {
    buf: VecDeque<u8>,
    done: Option<Result<(), BodyError>>,
    reader_gone: bool,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    state: Mutex<PipeState>,
    readable: Notify,
    writable: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Create a body pipe. The writer half belongs to the connection loop, the
/// `Body` half goes into the request handed to the handler. Reads report
/// consumed byte counts on `credit_tx` so the loop can replenish
/// flow-control windows.
pub(crate) fn body_pipe(
    capacity: usize,
    stream_id: StreamId,
    credit_tx: mpsc::Sender<WindowCredit>,
) -> (BodyWriter, Body) {
    let shared = Arc::new(Shared {
        capacity,
        state: Mutex::new(PipeState {
            buf: VecDeque::with_capacity(capacity.min(8 * 1024)),
            done: None,
            reader_gone: false,
        }),
        readable: Notify::new(),
        writable: Notify::new(),
    });
    (
        BodyWriter {
            shared: Arc::clone(&shared),
        },
        Body {
            inner: Some(BodyInner {
                shared,
                stream_id,
                credit_tx,
            }),
        },
    )
}

/// Producer half, owned by the connection loop.
#[derive(Debug)]
pub(crate) struct BodyWriter {
    shared: Arc<Shared>,
}

impl BodyWriter {
    /// Append payload bytes, waiting for ring space if the consumer is
    /// behind. Bytes written after the consumer is gone are discarded.
    pub(crate) async fn write(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            {
                let mut state = self.shared.lock();
                if state.done.is_some() || state.reader_gone {
                    return;
                }
                let space = self.shared.capacity - state.buf.len();
                if space > 0 {
                    let n = space.min(data.len());
                    state.buf.extend(&data[..n]);
                    data = &data[n..];
                    self.shared.readable.notify_one();
                    continue;
                }
            }
            self.shared.writable.notified().await;
        }
    }

    /// Terminate the pipe. The first close wins; buffered bytes remain
    /// readable before the terminal status is reported.
    pub(crate) fn close(&mut self, result: Result<(), BodyError>) {
        let mut state = self.shared.lock();
        if state.done.is_none() {
            state.done = Some(result);
        }
        self.shared.readable.notify_one();
    }
}

impl Drop for BodyWriter {
    fn drop(&mut self) {
        // A writer dropped without an explicit close means the connection
        // went away under the stream.
        self.close(Err(BodyError::ConnectionClosed));
    }
}

#[derive(Debug)]
struct BodyInner {
    shared: Arc<Shared>,
    stream_id: StreamId,
    credit_tx: mpsc::Sender<WindowCredit>,
}

/// The request body as seen by a handler.
///
/// Reads yield body bytes as DATA frames arrive, then `Ok(0)` at clean EOF.
/// A request with no body reads as immediate EOF. If the peer violated its
/// declared Content-Length or the stream died, the terminal [`BodyError`]
/// is returned once buffered bytes are drained.
#[derive(Debug)]
pub struct Body {
    inner: Option<BodyInner>,
}

impl Body {
    /// A body that is at EOF from the start.
    pub(crate) fn empty() -> Body {
        Body { inner: None }
    }

    /// Read up to `buf.len()` bytes. `Ok(0)` means EOF (or an empty `buf`).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, BodyError> {
        let Some(inner) = &self.inner else {
            return Ok(0);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            let copied = {
                let mut state = inner.shared.lock();
                if !state.buf.is_empty() {
                    let mut copied = 0;
                    while copied < buf.len() {
                        match state.buf.pop_front() {
                            Some(byte) => {
                                buf[copied] = byte;
                                copied += 1;
                            }
                            None => break,
                        }
                    }
                    inner.shared.writable.notify_one();
                    Some(copied)
                } else if let Some(done) = &state.done {
                    return done.clone().map(|()| 0);
                } else {
                    None
                }
            };

            match copied {
                Some(n) => {
                    // Consumed bytes become flow-control credit; the loop
                    // turns this into WINDOW_UPDATE frames.
                    let _ = inner
                        .credit_tx
                        .send(WindowCredit {
                            stream_id: inner.stream_id,
                            bytes: n as u64,
                        })
                        .await;
                    return Ok(n);
                }
                None => inner.shared.readable.notified().await,
            }
        }
    }

    /// Drain the whole body into memory.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, BodyError> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            let mut state = inner.shared.lock();
            state.reader_gone = true;
            inner.shared.writable.notify_one();
        }
    }
}
