//! Transport abstraction
//!
//! A connector turns a URL into a [`Link`]: an outbound sink and an inbound
//! stream of [`WireMessage`]s. The channel manager only ever sees links, so
//! the WebSocket client can be swapped for in-memory pipes in tests.

use crate::error::LinkError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Sink, Stream};
use std::pin::Pin;

/// Transport-level message
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Text(String),
    Binary(Bytes),
    /// Peer closed the connection
    Close,
}

pub type LinkSink = Pin<Box<dyn Sink<WireMessage, Error = LinkError> + Send>>;
pub type LinkStream = Pin<Box<dyn Stream<Item = Result<WireMessage, LinkError>> + Send>>;

/// One established duplex connection
pub struct Link {
    pub sink: LinkSink,
    pub stream: LinkStream,
}

impl Link {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<WireMessage, Error = LinkError> + Send + 'static,
        R: Stream<Item = Result<WireMessage, LinkError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens links to the relay
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport name for logs
    fn name(&self) -> &str;

    async fn connect(&self, url: &str) -> Result<Link, LinkError>;
}

#[cfg(feature = "websocket-transport")]
pub use self::websocket::WebSocketConnector;

#[cfg(feature = "websocket-transport")]
mod websocket {
    use super::*;
    use futures::{future, SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message};
    use tracing::debug;
    use url::Url;

    /// WebSocket client transport
    #[derive(Debug, Clone)]
    pub struct WebSocketConnector {
        connect_timeout: Duration,
    }

    impl WebSocketConnector {
        pub fn new(connect_timeout: Duration) -> Self {
            Self { connect_timeout }
        }
    }

    #[async_trait]
    impl Connector for WebSocketConnector {
        fn name(&self) -> &str {
            "websocket"
        }

        async fn connect(&self, url: &str) -> Result<Link, LinkError> {
            let parsed = Url::parse(url).map_err(|e| LinkError::InvalidUrl(e.to_string()))?;
            if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
                return Err(LinkError::InvalidUrl(format!("unsupported scheme '{}'", parsed.scheme())));
            }

            let (ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(parsed.as_str()))
                .await
                .map_err(|_| LinkError::Timeout(self.connect_timeout))?
                .map_err(|e| LinkError::Connect(e.to_string()))?;
            debug!("WebSocket handshake with {} complete", parsed);

            let (sink, stream) = ws_stream.split();
            let sink = sink
                .sink_map_err(|e| LinkError::Transport(e.to_string()))
                .with(|message: WireMessage| future::ready(Ok::<_, LinkError>(to_ws(message))));
            let stream = stream.filter_map(|item| {
                future::ready(match item {
                    Ok(message) => from_ws(message).map(Ok),
                    Err(e) => Some(Err(LinkError::Transport(e.to_string()))),
                })
            });

            Ok(Link::new(sink, stream))
        }
    }

    fn to_ws(message: WireMessage) -> Message {
        match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(bytes) => Message::Binary(bytes.to_vec()),
            WireMessage::Close => Message::Close(None),
        }
    }

    /// Control frames are answered by the protocol layer and not surfaced
    fn from_ws(message: Message) -> Option<WireMessage> {
        match message {
            Message::Text(text) => Some(WireMessage::Text(text)),
            Message::Binary(data) => Some(WireMessage::Binary(Bytes::from(data))),
            Message::Close(_) => Some(WireMessage::Close),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        }
    }

}
