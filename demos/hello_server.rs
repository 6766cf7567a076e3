//! Minimal prior-knowledge (h2c) HTTP/2 server over plain TCP.
//!
//! ```text
//! cargo run --example hello_server -- --listen 127.0.0.1:8080
//! curl --http2-prior-knowledge http://127.0.0.1:8080/anything
//! ```

use argh::FromArgs;
use h2serve::{serve, Handler, Request, ResponseWriter, ServerConfig};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(FromArgs)]
/// Serve a greeting over HTTP/2 without TLS.
struct Args {
    /// address to listen on
    #[argh(option, default = "String::from(\"127.0.0.1:8080\")")]
    listen: String,
}

struct Hello;

impl Handler for Hello {
    async fn handle(&self, response: &mut ResponseWriter, mut request: Request) {
        let body = match request.body_mut().read_to_end().await {
            Ok(body) => body,
            Err(_) => return,
        };
        response.headers_mut().insert("Content-Type", "text/plain");
        let greeting = format!(
            "{} {} via {} ({} request body bytes)\n",
            request.method(),
            request.path(),
            request.protocol(),
            body.len(),
        );
        let _ = response.write(greeting.as_bytes()).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Args = argh::from_env();

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(addr = %args.listen, "listening; try: curl --http2-prior-knowledge http://{}/", args.listen);

    let handler = Arc::new(Hello);
    loop {
        let (socket, peer) = listener.accept().await?;
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            if let Err(err) = serve(socket, ServerConfig::default(), handler).await {
                debug!(%peer, %err, "connection ended");
            }
        });
    }
}
