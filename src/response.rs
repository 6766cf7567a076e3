// ABOUTME: The response writer handed to handlers - buffers headers, then talks to the loop
// ABOUTME: Every send rendezvouses with the loop so bytes cannot outrun their HEADERS

use crate::conn::{DataWrite, HeaderWrite};
use crate::frame::StreamId;
use crate::headers::HeaderMap;
use bytes::Bytes;
use std::mem;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Error surfaced to handlers whose stream or connection went away.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteError {
    #[error("stream closed before the response completed")]
    Closed,
}

/// Writes one response. Handlers may stage headers and a status first; the
/// response is committed to the wire on the first status/body write and
/// finalized when the handler returns.
///
/// Commits and body writes block until the connection loop has actually
/// serialized the corresponding frames. That rendezvous is what keeps a
/// handler from racing its own HEADERS, and what makes body writes observe
/// flow control: a write parked on an empty window completes only when the
/// peer grants credit.
#[derive(Debug)]
pub struct ResponseWriter {
    stream_id: StreamId,
    status: Option<u16>,
    headers: HeaderMap,
    committed: bool,
    header_tx: mpsc::Sender<HeaderWrite>,
    data_tx: mpsc::Sender<DataWrite>,
}

impl ResponseWriter {
    pub(crate) fn new(
        stream_id: StreamId,
        header_tx: mpsc::Sender<HeaderWrite>,
        data_tx: mpsc::Sender<DataWrite>,
    ) -> ResponseWriter {
        ResponseWriter {
            stream_id,
            status: None,
            headers: HeaderMap::new(),
            committed: false,
            header_tx,
            data_tx,
        }
    }

    /// Response headers. Mutations after the response is committed have no
    /// effect on the wire.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Set the status and commit the response headers. The first call wins;
    /// later calls (and the implicit 200 from a body write) are ignored.
    pub async fn set_status(&mut self, status: u16) -> Result<(), WriteError> {
        if self.status.is_none() {
            self.status = Some(status);
        }
        self.commit(false).await
    }

    /// Write response body bytes, committing the headers first if needed.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), WriteError> {
        self.commit(false).await?;
        if data.is_empty() {
            return Ok(());
        }
        self.send_data(Bytes::copy_from_slice(data), false).await
    }

    /// Send the header-write request for this response exactly once.
    async fn commit(&mut self, end_stream: bool) -> Result<(), WriteError> {
        if self.committed {
            return Ok(());
        }
        self.committed = true;

        let (done_tx, done_rx) = oneshot::channel();
        self.header_tx
            .send(HeaderWrite {
                stream_id: self.stream_id,
                status: self.status.unwrap_or(200),
                headers: mem::take(&mut self.headers),
                end_stream,
                done: done_tx,
            })
            .await
            .map_err(|_| WriteError::Closed)?;
        done_rx.await.map_err(|_| WriteError::Closed)
    }

    async fn send_data(&mut self, data: Bytes, end_stream: bool) -> Result<(), WriteError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.data_tx
            .send(DataWrite {
                stream_id: self.stream_id,
                data,
                end_stream,
                done: done_tx,
            })
            .await
            .map_err(|_| WriteError::Closed)?;
        done_rx.await.map_err(|_| WriteError::Closed)
    }

    /// Runs after the handler returns: ends the stream, committing a bare
    /// 200 response if the handler never wrote anything.
    pub(crate) async fn finish(mut self) {
        let result = if self.committed {
            self.send_data(Bytes::new(), true).await
        } else {
            self.commit(true).await
        };
        // The stream may have been reset under us; nothing left to do.
        let _ = result;
    }
}
