//! Sort gate: turns a fused report into at most one sort

use crate::context::RuntimeContext;
use crate::error::CnsError;
use crate::sequence::{SequenceEmitter, SortScript};
use sortline_core::config::{SortingConfig, VisionConfig};
use sortline_core::types::FusedReport;
use tracing::{debug, info};

/// Outcome of evaluating one report
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    ControlDisabled,
    NoColorDetections,
    OffCenter { color: String, center_x: f32 },
    StatusUnknown,
    MechanismRunning,
    Fire { color: String, count: u64, script: SortScript },
}

impl GateDecision {
    pub fn fired(&self) -> bool {
        matches!(self, GateDecision::Fire { .. })
    }

    pub fn script(&self) -> Option<&SortScript> {
        match self {
            GateDecision::Fire { script, .. } => Some(script),
            _ => None,
        }
    }
}

pub struct SortGate {
    band: (f32, f32),
    emitter: SequenceEmitter,
}

impl SortGate {
    pub fn new(band: (f32, f32), emitter: SequenceEmitter) -> Self {
        Self { band, emitter }
    }

    pub fn from_config(vision: &VisionConfig, sorting: &SortingConfig) -> Self {
        Self::new(sorting.center_band, SequenceEmitter::from_config(vision, sorting))
    }

    /// Inclusive on both ends
    pub fn is_centered(&self, x: f32) -> bool {
        x >= self.band.0 && x <= self.band.1
    }

    /// Decide on `report`, recording the sort in `ctx` when it fires
    pub fn evaluate(&self, report: &FusedReport, ctx: &RuntimeContext) -> Result<GateDecision, CnsError> {
        if !ctx.status().control_enabled() {
            return Ok(GateDecision::ControlDisabled);
        }

        let target = match report.largest_color() {
            Some(detection) => detection,
            None => return Ok(GateDecision::NoColorDetections),
        };

        // Horizontal axis only
        if !self.is_centered(target.center.x) {
            debug!("Largest {} at x={:.3}, outside pick band", target.color, target.center.x);
            return Ok(GateDecision::OffCenter {
                color: target.color.clone(),
                center_x: target.center.x,
            });
        }

        let status = match ctx.status().robot_status() {
            Some(status) if !status.is_empty() => status,
            _ => return Ok(GateDecision::StatusUnknown),
        };
        if status.mechanism_running() {
            return Ok(GateDecision::MechanismRunning);
        }

        let script = self.emitter.script(&target.color)?;
        let count = ctx.record_sort(&target.color);
        info!("Sorting {} object ({} so far)", target.color, count);

        Ok(GateDecision::Fire {
            color: target.color.clone(),
            count,
            script,
        })
    }
}
