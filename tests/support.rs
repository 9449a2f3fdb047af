// Shared fixtures: in-memory links, a scripted connector and test frames

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use image::{ImageOutputFormat, Rgb, RgbImage};
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use sortline_agent::{EventRouter, VisionPipeline};
use sortline_cns::RuntimeContext;
use sortline_core::config::SortlineConfig;
use sortline_eye::NullDetector;
use sortline_link::{ChannelManager, Connector, Link, LinkError, WireMessage};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const GREY: [u8; 3] = [128, 128, 128];
pub const RED: [u8; 3] = [220, 20, 20];
pub const GREEN: [u8; 3] = [20, 200, 20];
pub const BLUE: [u8; 3] = [20, 20, 220];

/// Relay side of an in-memory link
pub struct Peer {
    pub inbound: mpsc::UnboundedSender<Result<WireMessage, LinkError>>,
    pub sent: mpsc::UnboundedReceiver<WireMessage>,
}

impl Peer {
    pub fn push_text(&self, text: &str) {
        self.inbound
            .unbounded_send(Ok(WireMessage::Text(text.to_string())))
            .unwrap();
    }

    pub fn push_frame(&self, payload: Bytes) {
        self.inbound.unbounded_send(Ok(WireMessage::Binary(payload))).unwrap();
    }

    /// Next JSON record the agent sent, waiting at most five seconds
    pub async fn next_record(&mut self) -> JsonValue {
        let message = tokio::time::timeout(Duration::from_secs(5), self.sent.next())
            .await
            .expect("timed out waiting for outbound message")
            .expect("link closed");
        record(&message)
    }
}

pub fn memory_link() -> (Link, Peer) {
    let (sent_tx, sent_rx) = mpsc::unbounded();
    let (inbound_tx, inbound_rx) = mpsc::unbounded();
    let link = Link::new(sent_tx.sink_map_err(|_| LinkError::Closed), inbound_rx);
    (link, Peer { inbound: inbound_tx, sent: sent_rx })
}

/// Hands out prepared links in order, then refuses
pub struct ScriptedConnector {
    links: Mutex<VecDeque<Link>>,
    attempts: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedConnector {
    pub fn new(links: Vec<Link>) -> Self {
        Self {
            links: Mutex::new(links.into()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<tokio::time::Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, _url: &str) -> Result<Link, LinkError> {
        self.attempts.lock().push(tokio::time::Instant::now());
        self.links
            .lock()
            .pop_front()
            .ok_or_else(|| LinkError::Connect("connection refused".to_string()))
    }
}

/// A fully wired agent running against scripted links
pub struct Agent {
    pub manager: Arc<ChannelManager>,
    pub ctx: Arc<RuntimeContext>,
    pub connector: Arc<ScriptedConnector>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), LinkError>>,
}

impl Agent {
    pub fn start(links: Vec<Link>) -> Self {
        Self::start_with(SortlineConfig::default(), links)
    }

    pub fn start_with(config: SortlineConfig, links: Vec<Link>) -> Self {
        let ctx = Arc::new(RuntimeContext::with_palette(
            config.vision.colors.iter().map(|c| c.name.as_str()),
        ));
        let connector = Arc::new(ScriptedConnector::new(links));
        let manager = Arc::new(ChannelManager::new(config.link.clone(), connector.clone()));
        let pipeline = Arc::new(VisionPipeline::new(
            &config,
            Arc::new(NullDetector),
            Arc::clone(&ctx),
            Arc::new(manager.handle()),
        ));
        let router = Arc::new(EventRouter::new(pipeline));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run(router, shutdown_rx).await }
        });

        Self {
            manager,
            ctx,
            connector,
            shutdown,
            task,
        }
    }

    pub async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

/// Parse an outbound text message as JSON
pub fn record(message: &WireMessage) -> JsonValue {
    match message {
        WireMessage::Text(text) => serde_json::from_str(text).unwrap(),
        other => panic!("Expected text message, got {:?}", other),
    }
}

/// 200x100 PNG with one square of `color` whose top-left corner is (x, 30)
pub fn frame_with_square(x: u32, side: u32, color: [u8; 3]) -> Bytes {
    frame_with_rects(&[(x, 30, side, side, color)])
}

/// 200x100 PNG on a grey background with `(x, y, width, height, color)` rectangles
pub fn frame_with_rects(rects: &[(u32, u32, u32, u32, [u8; 3])]) -> Bytes {
    let mut img = RgbImage::from_pixel(200, 100, Rgb(GREY));
    for &(x, y, w, h, color) in rects {
        for yy in y..y + h {
            for xx in x..x + w {
                img.put_pixel(xx, yy, Rgb(color));
            }
        }
    }
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    Bytes::from(bytes)
}
