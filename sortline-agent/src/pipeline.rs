//! Frame pipeline
//!
//! One frame at a time: decode and fuse on the blocking pool, report the
//! detections, then let the sort gate decide whether the arm moves. A frame
//! that arrives while another is in flight is dropped.

use crate::error::FrameError;
use bytes::Bytes;
use sortline_cns::{GateDecision, RuntimeContext, SortGate};
use sortline_core::config::SortlineConfig;
use sortline_core::types::FusedReport;
use sortline_eye::{DetectionFusion, FrameDecoder, ObjectDetector};
use sortline_link::{ChannelHandle, InboundEvent, InboundHandler, OutboundMessage};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where outbound messages go
pub trait CommandSink: Send + Sync {
    /// `false` if the message was dropped
    fn send(&self, message: OutboundMessage) -> bool;
}

impl CommandSink for ChannelHandle {
    fn send(&self, message: OutboundMessage) -> bool {
        ChannelHandle::send(self, message)
    }
}

/// What happened to one processed frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub width: u32,
    pub height: u32,
    pub detections: usize,
    pub decision: GateDecision,
}

pub struct VisionPipeline {
    decoder: FrameDecoder,
    fusion: DetectionFusion,
    gate: SortGate,
    ctx: Arc<RuntimeContext>,
    outbound: Arc<dyn CommandSink>,
}

impl VisionPipeline {
    pub fn new(
        config: &SortlineConfig,
        detector: Arc<dyn ObjectDetector>,
        ctx: Arc<RuntimeContext>,
        outbound: Arc<dyn CommandSink>,
    ) -> Self {
        Self {
            decoder: FrameDecoder::default(),
            fusion: DetectionFusion::new(&config.vision, detector),
            gate: SortGate::from_config(&config.vision, &config.sorting),
            ctx,
            outbound,
        }
    }

    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.ctx
    }

    /// Start processing `payload` unless a frame is already in flight.
    ///
    /// Returns `None` when the frame was dropped.
    pub fn submit(self: &Arc<Self>, payload: Bytes) -> Option<JoinHandle<Result<FrameSummary, FrameError>>> {
        let guard = match self.ctx.slot().try_enter() {
            Some(guard) => guard,
            None => {
                debug!("Frame dropped, previous frame still processing");
                return None;
            }
        };

        let pipeline = Arc::clone(self);
        Some(tokio::spawn(async move {
            let result = pipeline.process(payload).await;
            drop(guard);
            if let Err(e) = &result {
                warn!("Frame {} stage failed: {}", e.stage(), e);
            }
            result
        }))
    }

    /// Run every stage for one frame; the caller holds the processing slot
    pub async fn process(self: Arc<Self>, payload: Bytes) -> Result<FrameSummary, FrameError> {
        let worker = Arc::clone(&self);
        let (report, (width, height)) = tokio::task::spawn_blocking(move || worker.analyze(&payload))
            .await
            .map_err(|e| FrameError::Worker(e.to_string()))??;

        let detections = report.len();
        let decision = self.gate.evaluate(&report, &self.ctx).map_err(FrameError::Emit);
        // a frame that failed to gate reports nothing found
        let report = match &decision {
            Ok(_) => report,
            Err(_) => FusedReport::empty(report.timestamp),
        };
        if !self.outbound.send(OutboundMessage::detection(report)) {
            debug!("Detection report not delivered");
        }
        let decision = decision?;

        if let GateDecision::Fire { color, script, .. } = &decision {
            for command in script.clone().into_commands() {
                if !self.outbound.send(OutboundMessage::robot_command(command)) {
                    warn!("Sort command for {} object not delivered", color);
                }
            }
            info!("Sent sorting command for {} object. Total sorted: {:?}", color, self.ctx.counters());
        }

        Ok(FrameSummary {
            width,
            height,
            detections,
            decision,
        })
    }

    /// CPU-bound part: decode and fuse
    fn analyze(&self, payload: &[u8]) -> Result<(FusedReport, (u32, u32)), FrameError> {
        let frame = self.decoder.decode(payload).map_err(FrameError::Decode)?;
        let size = (frame.width(), frame.height());
        self.ctx.record_frame(size.0, size.1);
        let report = self.fusion.fuse(&frame).map_err(FrameError::Fuse)?;
        Ok((report, size))
    }
}

/// Routes inbound events into the pipeline and the status cache
pub struct EventRouter {
    pipeline: Arc<VisionPipeline>,
}

impl EventRouter {
    pub fn new(pipeline: Arc<VisionPipeline>) -> Self {
        Self { pipeline }
    }
}

impl InboundHandler for EventRouter {
    fn on_event(&self, event: InboundEvent) {
        let status = self.pipeline.context().status();
        match event {
            InboundEvent::Frame(payload) => {
                let _ = self.pipeline.submit(payload);
            }
            InboundEvent::Control { enabled } => {
                status.set_control_enabled(enabled);
                info!("AI control enabled: {}", enabled);
            }
            InboundEvent::RobotStatus(robot_status) => status.set_robot_status(robot_status),
        }
    }
}
