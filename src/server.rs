// ABOUTME: Public entry point - the Handler trait, server configuration, and serve()

use crate::conn::{serve_connection, ConnError};
use crate::request::Request;
use crate::response::ResponseWriter;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// The ALPN protocol identifier the surrounding TLS acceptor must advertise
/// for peers to negotiate HTTP/2 (RFC 7540 Section 3.3).
pub const ALPN_H2: &str = "h2";

/// Application logic invoked once per request stream.
///
/// Handlers run on their own tasks, one per open stream, and interact with
/// the connection only through the [`ResponseWriter`] and the request body
/// reader. A handler that returns without writing anything produces an
/// empty 200 response; a handler that panics resets its stream and leaves
/// the connection serving other streams.
pub trait Handler: Send + Sync + 'static {
    /// Serve one request. The response is finalized when the returned
    /// future completes.
    fn handle(
        &self,
        response: &mut ResponseWriter,
        request: Request,
    ) -> impl Future<Output = ()> + Send;
}

/// Per-connection configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Cap on concurrently open request streams. Zero means unlimited.
    /// Streams opened past the cap are refused with REFUSED_STREAM.
    pub max_streams: usize,
}

/// Builder for [`ServerConfig`].
///
/// # Examples
///
/// ```rust,no_run
/// use h2serve::ServerBuilder;
///
/// let config = ServerBuilder::new().max_streams(128).build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Limit the number of concurrently open streams per connection.
    pub fn max_streams(mut self, max_streams: usize) -> ServerBuilder {
        self.config.max_streams = max_streams;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

/// Serve HTTP/2 on one established, already-negotiated byte stream.
///
/// The caller owns listen/accept and TLS: this function takes any
/// bidirectional transport (a plain `TcpStream` for prior-knowledge h2c, a
/// TLS stream whose ALPN selected [`ALPN_H2`]) and runs the connection to
/// completion - handshake, multiplexed request dispatch, teardown.
///
/// Returns `Ok(())` when the peer closes cleanly. Protocol violations and
/// transport failures are returned after being logged; callers that only
/// care about serving can ignore the result.
pub async fn serve<T, H>(io: T, config: ServerConfig, handler: Arc<H>) -> Result<(), ConnError>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    H: Handler,
{
    serve_connection(io, config, handler).await
}
