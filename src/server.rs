// Acceptor + per-connection reader.
//
// `tokio::select!` races `listener.accept()` against a shutdown signal;
// each accepted connection is handed a `LinesCodec`-framed stream and
// spawned onto its own task, since this protocol is newline delimited.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LinesCodec};

use crate::error::{OthernetError, OthernetResult};
use crate::handler::{self, Delivered};
use crate::node::Node;
use crate::protocol::ProtocolMessage;

/// Renders an inbound `OTHERNET_MESSAGE` to the external surface. The core
/// never decides how to render; it only classifies and forwards the event.
pub trait Surface: Send + Sync + 'static {
    fn on_delivered(&self, delivered: Delivered);
}

pub async fn bind(bind_ip: &str, port: u16) -> OthernetResult<TcpListener> {
    TcpListener::bind((bind_ip, port))
        .await
        .map_err(OthernetError::BindFailed)
}

/// Accept loop. Runs until `node.is_running()` is observed false or the
/// listener fails to produce a connection. Each accepted connection is
/// handed to a spawned reader task that decodes one message per line.
pub async fn run<S: Surface>(
    node: Arc<Node>,
    listener: TcpListener,
    surface: Arc<S>,
) -> OthernetResult<()> {
    log::info!("accepting connections on {}", listener.local_addr()?);

    loop {
        if !node.is_running() {
            return Ok(());
        }

        tokio::select! {
            _ = node.shutdown.notified() => {
                return Ok(());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        log::debug!("peer connected: {}", addr);

                        let node = node.clone();
                        let surface = surface.clone();

                        tokio::spawn(async move {
                            read_connection(node, stream, addr.ip().to_string(), surface).await;
                        });
                    }
                    Err(e) => {
                        log::warn!("{}", OthernetError::AcceptFailed(e));
                    }
                }
            }
        }
    }
}

async fn read_connection<S: Surface>(
    node: Arc<Node>,
    stream: tokio::net::TcpStream,
    peer_ip: String,
    surface: Arc<S>,
) {
    let mut framed = Framed::new(stream, LinesCodec::new());

    while let Some(next) = framed.next().await {
        let line = match next {
            Ok(line) => line,
            Err(e) => {
                log::debug!("connection from {} closed: {}", peer_ip, e);
                break;
            }
        };

        match ProtocolMessage::parse(&line) {
            Ok(msg) => {
                if let Some(delivered) = handler::dispatch(&node, &peer_ip, msg).await {
                    surface.on_delivered(delivered);
                }
            }
            Err(e) => {
                // Unknown/unparseable lines are discarded silently; the
                // reader continues per the wire codec's decoding
                // guarantees.
                log::debug!("discarding unparseable line from {}: {}", peer_ip, e);
            }
        }
    }

    log::debug!("reader for {} exiting", peer_ip);
}
