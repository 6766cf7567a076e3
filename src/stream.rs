// ABOUTME: Per-stream record - state machine, outbound window, body producer, parked writes

use crate::body::BodyWriter;
use crate::flow::FlowWindow;
use crate::frame::StreamId;
use bytes::Bytes;
use tokio::sync::oneshot;

/// Stream states (RFC 7540 Section 5.1), server view.
///
/// `Idle` and the push-reserved states never appear in the stream table:
/// a stream is created directly in `Open` (or `HalfClosedRemote` when the
/// opening HEADERS carried END_STREAM) and is removed the moment it would
/// become `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamState {
    /// Both directions open: request body inbound, response outbound.
    Open,
    /// Peer finished sending; our response is still in flight.
    HalfClosedRemote,
    /// We finished the response; the request body may still arrive.
    HalfClosedLocal,
    /// Both directions done; the entry is about to be dropped.
    Closed,
}

/// A response write the loop could not complete for lack of flow-control
/// credit. At most one exists per stream: the response writer blocks on its
/// completion signal, so a handler cannot queue a second write behind it.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub(crate) data: Bytes,
    pub(crate) end_stream: bool,
    pub(crate) done: oneshot::Sender<()>,
}

#[derive(Debug)]
pub(crate) struct Stream {
    pub(crate) id: StreamId,
    pub(crate) state: StreamState,

    /// Outbound window; inbound credit is implied by the body pipe.
    pub(crate) flow: FlowWindow,

    /// Producer half of the request body pipe, present while a body is
    /// expected and not yet terminated.
    pub(crate) body: Option<BodyWriter>,

    /// Total DATA payload bytes received so far.
    pub(crate) bytes_seen: u64,

    /// Content-Length from the request headers, -1 when absent.
    pub(crate) declared_body_bytes: i64,

    pub(crate) pending_write: Option<PendingWrite>,
}

impl Stream {
    pub(crate) fn new(id: StreamId, end_stream: bool, initial_window: i32) -> Stream {
        Stream {
            id,
            state: if end_stream {
                StreamState::HalfClosedRemote
            } else {
                StreamState::Open
            },
            flow: FlowWindow::new(initial_window),
            body: None,
            bytes_seen: 0,
            declared_body_bytes: -1,
            pending_write: None,
        }
    }

    /// Peer closed its direction (END_STREAM received).
    pub(crate) fn close_remote(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal | StreamState::Closed => StreamState::Closed,
            StreamState::HalfClosedRemote => StreamState::HalfClosedRemote,
        };
    }

    /// We closed our direction (END_STREAM sent).
    pub(crate) fn close_local(&mut self) {
        self.state = match self.state {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote | StreamState::Closed => StreamState::Closed,
            StreamState::HalfClosedLocal => StreamState::HalfClosedLocal,
        };
    }

    /// May this stream still receive DATA frames?
    pub(crate) fn accepts_data(&self) -> bool {
        matches!(self.state, StreamState::Open | StreamState::HalfClosedLocal)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state == StreamState::Closed
    }
}
