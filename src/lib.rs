//! Server-side HTTP/2 (RFC 7540) over any established byte stream.
//!
//! This crate implements the per-connection wire protocol: the serve loop
//! that owns all connection state, the stream state machine, HPACK header
//! compression across frames, flow-control accounting, and the dispatch of
//! concurrent requests to application handlers. It does not listen, accept,
//! or negotiate TLS - hand [`serve`] a connected transport and a handler.
//!
//! Each connection is driven by three kinds of cooperating tasks: a reader
//! that parses frames one at a time, the serve loop that owns every piece
//! of protocol state and is the only writer of outbound frames, and one
//! handler task per open request stream. They coordinate purely by message
//! passing; handlers never touch the framer or the stream table.
//!
//! # Examples
//!
//! ```rust,no_run
//! use h2serve::{serve, Handler, Request, ResponseWriter, ServerConfig};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! struct Hello;
//!
//! impl Handler for Hello {
//!     async fn handle(&self, response: &mut ResponseWriter, request: Request) {
//!         response.headers_mut().insert("Content-Type", "text/plain");
//!         let _ = response
//!             .write(format!("hello, {}\n", request.path()).as_bytes())
//!             .await;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:8443").await?;
//!     let handler = Arc::new(Hello);
//!     loop {
//!         let (socket, _) = listener.accept().await?;
//!         let handler = Arc::clone(&handler);
//!         tokio::spawn(async move {
//!             let _ = serve(socket, ServerConfig::default(), handler).await;
//!         });
//!     }
//! }
//! ```

mod body;
pub mod codec;
mod conn;
mod flow;
pub mod frame;
pub mod headers;
pub mod hpack;
mod request;
mod response;
mod server;
mod stream;

#[cfg(test)]
mod tests;

pub use body::{Body, BodyError};
pub use conn::ConnError;
pub use frame::{ErrorCode, StreamId};
pub use headers::HeaderMap;
pub use request::{Request, TlsState};
pub use response::{ResponseWriter, WriteError};
pub use server::{serve, Handler, ServerBuilder, ServerConfig, ALPN_H2};

/// A specialized `Result` for connection-serving operations.
pub type Result<T> = std::result::Result<T, ConnError>;
