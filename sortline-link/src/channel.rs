//! Channel manager: one logical connection to the relay, kept alive forever
//!
//! A single task owns the transport and walks the connection state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Open -> Closing -> Disconnected -> ...
//! ```
//!
//! Failed or closed connections are retried after a fixed delay. Outbound
//! messages are accepted only while a session is open; each session has its
//! own queue, so anything left unsent when it dies is discarded with it.

use crate::error::LinkError;
use crate::protocol::{parse_record, InboundEvent, OutboundMessage};
use crate::transport::{Connector, Link, WireMessage};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use sortline_core::config::LinkConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Per-session outbound queue depth
const OUTBOUND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Receives everything the relay sends
pub trait InboundHandler: Send + Sync {
    fn on_event(&self, event: InboundEvent);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Connection attempts, successful or not
    pub attempts: u64,
    /// Sessions that reached Open
    pub sessions: u64,
    /// Outbound messages dropped because no session was open
    pub dropped: u64,
}

#[derive(Debug)]
enum SessionEnd {
    Closed,
    Failed(LinkError),
    Shutdown,
}

struct Shared {
    state: RwLock<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    attempts: AtomicU64,
    sessions: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            outbound: Mutex::new(None),
            attempts: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            debug!("Connection state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Install the session queue and mark the channel open
    fn open(&self, sender: mpsc::Sender<String>) {
        let mut outbound = self.outbound.lock();
        *outbound = Some(sender);
        self.set_state(ConnectionState::Open);
    }

    /// Drop the session queue; anything still in it is lost
    fn close(&self) {
        let mut outbound = self.outbound.lock();
        *outbound = None;
        self.set_state(ConnectionState::Closing);
    }
}

/// Cloneable sender side of the channel
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<Shared>,
}

impl ChannelHandle {
    /// Queue a message on the open session.
    ///
    /// Returns `false` when the message was dropped: no open session, a full
    /// queue, or a message that failed to serialize.
    pub fn send(&self, message: OutboundMessage) -> bool {
        let outbound = self.shared.outbound.lock();
        let sender = match outbound.as_ref() {
            Some(sender) => sender,
            None => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping '{}' message, channel not open", message.kind());
                return false;
            }
        };

        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode '{}' message: {}", message.kind(), e);
                return false;
            }
        };

        match sender.try_send(text) {
            Ok(()) => true,
            Err(e) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Dropping '{}' message: {}", message.kind(), e);
                false
            }
        }
    }

    pub fn is_open(&self) -> bool {
        *self.shared.state.read() == ConnectionState::Open
    }
}

pub struct ChannelManager {
    config: LinkConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
}

impl ChannelManager {
    pub fn new(config: LinkConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn handle(&self) -> ChannelHandle {
        ChannelHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            attempts: self.shared.attempts.load(Ordering::Relaxed),
            sessions: self.shared.sessions.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }

    /// Connect, serve and reconnect until `shutdown` flips to true
    pub async fn run(
        &self,
        handler: Arc<dyn InboundHandler>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), LinkError> {
        let delay = self.config.reconnect_delay();
        info!(
            "Channel manager starting ({} transport, {})",
            self.connector.name(),
            self.config.url
        );

        while !*shutdown.borrow() {
            self.shared.set_state(ConnectionState::Connecting);
            let attempt = self.shared.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Connection attempt {} to {}", attempt, self.config.url);

            let connected = tokio::select! {
                result = self.connector.connect(&self.config.url) => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(link) => {
                    self.shared.sessions.fetch_add(1, Ordering::Relaxed);
                    info!("Connected to {}", self.config.url);
                    match self.session(link, handler.as_ref(), &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Closed => info!("Connection closed by peer"),
                        SessionEnd::Failed(e) => warn!("Connection lost: {}", e),
                    }
                }
                Err(e) => warn!("Connection to {} failed: {}", self.config.url, e),
            }

            self.shared.set_state(ConnectionState::Disconnected);
            info!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        info!("Channel manager stopped");
        Ok(())
    }

    async fn session(
        &self,
        link: Link,
        handler: &dyn InboundHandler,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let Link { mut sink, mut stream } = link;
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

        // Queued sends wait for the loop below, so hello is always first
        self.shared.open(tx);
        let hello = OutboundMessage::hello(&self.config.client_name, &self.config.client_version);
        let greeted = match hello.to_text() {
            Ok(text) => sink.send(WireMessage::Text(text)).await,
            Err(e) => Err(e),
        };

        let end = match greeted {
            Err(e) => SessionEnd::Failed(e),
            Ok(()) => loop {
                tokio::select! {
                    inbound = stream.next() => match inbound {
                        Some(Ok(WireMessage::Close)) | None => break SessionEnd::Closed,
                        Some(Ok(message)) => self.dispatch(message, handler),
                        Some(Err(e)) => break SessionEnd::Failed(e),
                    },
                    Some(text) = rx.recv() => {
                        if let Err(e) = sink.send(WireMessage::Text(text)).await {
                            break SessionEnd::Failed(e);
                        }
                    }
                    _ = shutdown.changed() => break SessionEnd::Shutdown,
                }
            },
        };

        self.shared.close();
        if let Err(e) = sink.close().await {
            debug!("Error closing transport: {}", e);
        }
        end
    }

    /// Route one inbound message to the handler
    pub fn dispatch(&self, message: WireMessage, handler: &dyn InboundHandler) {
        match message {
            WireMessage::Binary(payload) => handler.on_event(InboundEvent::Frame(payload)),
            WireMessage::Text(text) => match parse_record(&text) {
                Ok(Some(event)) => handler.on_event(event),
                Ok(None) => {}
                Err(e) => warn!("Ignoring inbound record: {}", e),
            },
            WireMessage::Close => debug!("Close received outside a session"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::channel::mpsc as pipe;
    use serde_json::Value as JsonValue;
    use sortline_core::types::RobotStatus;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Test side of an in-memory link
    struct Peer {
        inbound: pipe::UnboundedSender<Result<WireMessage, LinkError>>,
        sent: pipe::UnboundedReceiver<WireMessage>,
    }

    fn memory_link() -> (Link, Peer) {
        let (sent_tx, sent_rx) = pipe::unbounded();
        let (inbound_tx, inbound_rx) = pipe::unbounded();
        let link = Link::new(sent_tx.sink_map_err(|_| LinkError::Closed), inbound_rx);
        (link, Peer { inbound: inbound_tx, sent: sent_rx })
    }

    struct ScriptedConnector {
        links: Mutex<VecDeque<Link>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn new(links: Vec<Link>) -> Self {
            Self {
                links: Mutex::new(links.into()),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn connect(&self, _url: &str) -> Result<Link, LinkError> {
            self.attempts.lock().push(Instant::now());
            self.links
                .lock()
                .pop_front()
                .ok_or_else(|| LinkError::Connect("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Mutex<Vec<InboundEvent>>,
    }

    impl RecordingHandler {
        fn events(&self) -> Vec<InboundEvent> {
            self.events.lock().clone()
        }
    }

    impl InboundHandler for RecordingHandler {
        fn on_event(&self, event: InboundEvent) {
            self.events.lock().push(event);
        }
    }

    fn message_type(message: &WireMessage) -> String {
        match message {
            WireMessage::Text(text) => {
                let value: JsonValue = serde_json::from_str(text).unwrap();
                value["type"].as_str().unwrap().to_string()
            }
            other => panic!("Expected text message, got {:?}", other),
        }
    }

    fn start(
        connector: Arc<ScriptedConnector>,
        handler: Arc<RecordingHandler>,
    ) -> (
        Arc<ChannelManager>,
        watch::Sender<bool>,
        tokio::task::JoinHandle<Result<(), LinkError>>,
    ) {
        let manager = Arc::new(ChannelManager::new(LinkConfig::default(), connector));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run(handler, shutdown_rx).await }
        });
        (manager, shutdown_tx, task)
    }

    #[test]
    fn test_send_dropped_when_not_open() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let manager = ChannelManager::new(LinkConfig::default(), connector);
        let handle = manager.handle();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!handle.is_open());
        assert!(!handle.send(OutboundMessage::hello("ai_vision", "1.0")));
        assert_eq!(manager.stats().dropped, 1);
    }

    #[test]
    fn test_dispatch_routes_records() {
        let manager = ChannelManager::new(
            LinkConfig::default(),
            Arc::new(ScriptedConnector::new(Vec::new())),
        );
        let handler = RecordingHandler::default();

        manager.dispatch(WireMessage::Binary(bytes::Bytes::from_static(b"jpeg")), &handler);
        manager.dispatch(WireMessage::Text(r#"{"type":"control_status","enabled":true}"#.to_string()), &handler);
        manager.dispatch(WireMessage::Text(r#"{"type":"robot_status"}"#.to_string()), &handler);
        manager.dispatch(WireMessage::Text(r#"{"type":"frame_metadata"}"#.to_string()), &handler);
        manager.dispatch(WireMessage::Text("{broken".to_string()), &handler);

        assert_eq!(
            handler.events(),
            vec![
                InboundEvent::Frame(bytes::Bytes::from_static(b"jpeg")),
                InboundEvent::Control { enabled: true },
                InboundEvent::RobotStatus(RobotStatus::new(serde_json::json!({}))),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hello_first_then_outbound() {
        let (link, mut peer) = memory_link();
        let connector = Arc::new(ScriptedConnector::new(vec![link]));
        let (manager, shutdown, task) = start(connector, Arc::new(RecordingHandler::default()));

        let hello = peer.sent.next().await.unwrap();
        assert_eq!(message_type(&hello), "hello");
        assert_eq!(manager.state(), ConnectionState::Open);

        let handle = manager.handle();
        assert!(handle.send(OutboundMessage::detection(sortline_core::types::FusedReport::empty(1.0))));
        let sent = peer.sent.next().await.unwrap();
        assert_eq!(message_type(&sent), "detection");

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        // transport closed exactly once, nothing after it
        assert_eq!(peer.sent.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_reaches_handler() {
        let (link, mut peer) = memory_link();
        let connector = Arc::new(ScriptedConnector::new(vec![link]));
        let handler = Arc::new(RecordingHandler::default());
        let (_manager, shutdown, task) = start(connector, Arc::clone(&handler));

        peer.sent.next().await.unwrap();
        peer.inbound
            .unbounded_send(Ok(WireMessage::Text(r#"{"type":"control_status","enabled":true}"#.to_string())))
            .unwrap();
        peer.inbound
            .unbounded_send(Ok(WireMessage::Binary(bytes::Bytes::from_static(b"frame"))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            handler.events(),
            vec![
                InboundEvent::Control { enabled: true },
                InboundEvent::Frame(bytes::Bytes::from_static(b"frame")),
            ]
        );
        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_once_after_close_and_resends_hello() {
        let (first, mut first_peer) = memory_link();
        let (second, mut second_peer) = memory_link();
        let connector = Arc::new(ScriptedConnector::new(vec![first, second]));
        let (manager, shutdown, task) = start(Arc::clone(&connector), Arc::new(RecordingHandler::default()));

        let hello = first_peer.sent.next().await.unwrap();
        assert_eq!(message_type(&hello), "hello");

        // relay goes away
        drop(first_peer.inbound);
        assert_eq!(first_peer.sent.next().await, None);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // nothing is queued for the next session
        assert!(!manager.handle().send(OutboundMessage::hello("stale", "0")));

        let hello = second_peer.sent.next().await.unwrap();
        assert_eq!(message_type(&hello), "hello");
        assert!(second_peer.sent.try_next().is_err());

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[1].duration_since(attempts[0]) >= Duration::from_secs(5));

        let stats = manager.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.sessions, 2);

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_retries_at_fixed_delay() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let (manager, shutdown, task) = start(Arc::clone(&connector), Arc::new(RecordingHandler::default()));

        tokio::time::sleep(Duration::from_millis(16_000)).await;
        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 4);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1].duration_since(pair[0]), Duration::from_secs(5));
        }
        assert_eq!(manager.stats().sessions, 0);

        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_reconnect_wait() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let (manager, shutdown, task) = start(Arc::clone(&connector), Arc::new(RecordingHandler::default()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = Instant::now();
        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(Instant::now(), before);
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
