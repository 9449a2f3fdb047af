//! sortline-link: the agent's only connection to the outside world
//!
//! Provides:
//! - Wire messages exchanged with the relay (hello, detections, robot commands)
//! - A pluggable transport seam with a WebSocket implementation
//! - The channel manager: connect, dispatch inbound records, reconnect forever

pub mod error;
pub mod protocol;
pub mod transport;
pub mod channel;

pub use error::LinkError;
pub use protocol::{OutboundMessage, InboundEvent, parse_record};
pub use transport::{Connector, Link, WireMessage};
#[cfg(feature = "websocket-transport")]
pub use transport::WebSocketConnector;
pub use channel::{ChannelManager, ChannelHandle, ConnectionState, ConnectionStats, InboundHandler};
