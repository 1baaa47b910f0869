//! Frame transport
//!
//! A type-erased, message-oriented duplex connection. The write half goes to
//! the write pump and the read half to the read pump, so each side of a
//! connection has exactly one owner.

use std::pin::Pin;

use futures_util::sink::Sink;
use futures_util::stream::Stream;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message as Frame};
use tokio_tungstenite::WebSocketStream;

/// Outgoing half of a transport
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = WsError> + Send>>;

/// Incoming half of a transport
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame, WsError>> + Send>>;

/// An upgraded connection, split into its two halves
pub struct Transport {
    pub(crate) sink: FrameSink,
    pub(crate) stream: FrameStream,
}

impl Transport {
    /// Wrap an already upgraded WebSocket stream
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();
        Self::from_parts(sink, stream)
    }

    /// Build a transport from any frame sink and stream
    pub fn from_parts<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = WsError> + Send + 'static,
        St: Stream<Item = Result<Frame, WsError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// In-memory WebSocket pair for tests: the server side as a `Transport`
/// and the raw client side
#[cfg(test)]
pub(crate) async fn pair(
    max_buf_size: usize,
) -> (Transport, WebSocketStream<tokio::io::DuplexStream>) {
    use tokio_tungstenite::tungstenite::protocol::Role;

    let (server, client) = tokio::io::duplex(max_buf_size);
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    (Transport::new(server), client)
}
