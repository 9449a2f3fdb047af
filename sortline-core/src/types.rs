//! Detection data model and actuator steps shared across the workspace

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::convert::TryFrom;

/// Key under which the remote mechanism reports its running state
pub const MECHANISM_KEY: &str = "conveyor";

/// Current time as fractional seconds since the Unix epoch
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Bounding box relative to the frame, every field in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    /// Divide a pixel-space box by the frame dimensions.
    ///
    /// Returns `None` for an empty frame.
    pub fn from_pixels(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let fw = frame_width as f32;
        let fh = frame_height as f32;
        Some(Self {
            x: x / fw,
            y: y / fh,
            width: width / fw,
            height: height / fh,
        })
    }

    /// Whether every coordinate lies in [0, 1]
    pub fn is_within_unit(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
    }
}

/// Point relative to the frame, both coordinates in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPoint {
    pub x: f32,
    pub y: f32,
}

impl NormalizedPoint {
    pub fn from_pixels(x: f32, y: f32, frame_width: u32, frame_height: u32) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        Some(Self {
            x: x / frame_width as f32,
            y: y / frame_height as f32,
        })
    }
}

/// Region found by color thresholding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorDetection {
    pub color: String,
    /// Region area in square pixels of the source frame
    pub area: f64,
    /// Always 1.0 for color regions
    pub confidence: f32,
    pub bbox: NormalizedBox,
    pub center: NormalizedPoint,
}

/// Box produced by the object detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f32,
    pub bbox: NormalizedBox,
}

/// Single entry of a fused report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detection {
    Color(ColorDetection),
    Object(ObjectDetection),
}

impl Detection {
    pub fn as_color(&self) -> Option<&ColorDetection> {
        match self {
            Detection::Color(c) => Some(c),
            Detection::Object(_) => None,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Detection::Color(c) => c.confidence,
            Detection::Object(o) => o.confidence,
        }
    }

    pub fn bbox(&self) -> &NormalizedBox {
        match self {
            Detection::Color(c) => &c.bbox,
            Detection::Object(o) => &o.bbox,
        }
    }
}

/// Detections of one frame: color regions by descending area, then objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedReport {
    pub detections: Vec<Detection>,
    /// Capture time, seconds since the Unix epoch
    pub timestamp: f64,
}

impl FusedReport {
    /// Assemble a report, ordering color regions by area (largest first).
    /// Equal areas keep their encounter order.
    pub fn assemble(
        mut colors: Vec<ColorDetection>,
        objects: Vec<ObjectDetection>,
        timestamp: f64,
    ) -> Self {
        colors.sort_by(|a, b| b.area.total_cmp(&a.area));
        let detections = colors
            .into_iter()
            .map(Detection::Color)
            .chain(objects.into_iter().map(Detection::Object))
            .collect();
        Self { detections, timestamp }
    }

    pub fn empty(timestamp: f64) -> Self {
        Self { detections: Vec::new(), timestamp }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn color_detections(&self) -> impl Iterator<Item = &ColorDetection> {
        self.detections.iter().filter_map(Detection::as_color)
    }

    pub fn object_detections(&self) -> impl Iterator<Item = &ObjectDetection> {
        self.detections.iter().filter_map(|d| match d {
            Detection::Object(o) => Some(o),
            Detection::Color(_) => None,
        })
    }

    /// Largest color region; the first one wins a tie
    pub fn largest_color(&self) -> Option<&ColorDetection> {
        self.color_detections().fold(None, |best, candidate| match best {
            Some(current) if current.area >= candidate.area => Some(current),
            _ => Some(candidate),
        })
    }
}

/// Latest status snapshot reported by the robot, kept opaque
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotStatus(JsonValue);

impl RobotStatus {
    pub fn new(value: JsonValue) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &JsonValue {
        &self.0
    }

    /// A null or empty-object snapshot carries no information
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Null => true,
            JsonValue::Object(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Mechanism running flag; absent means not running
    pub fn mechanism_running(&self) -> bool {
        self.0
            .get(MECHANISM_KEY)
            .and_then(|m| m.get("running"))
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }
}

impl From<JsonValue> for RobotStatus {
    fn from(value: JsonValue) -> Self {
        Self(value)
    }
}

/// Instruction for the conveyor that feeds the arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "MechanismWire", try_from = "MechanismWire")]
pub enum MechanismCommand {
    Stop,
    Run { speed: u16, direction: i8 },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MechanismWire {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    stop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    speed: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    direction: Option<i8>,
}

impl From<MechanismCommand> for MechanismWire {
    fn from(cmd: MechanismCommand) -> Self {
        match cmd {
            MechanismCommand::Stop => MechanismWire { stop: true, ..Default::default() },
            MechanismCommand::Run { speed, direction } => MechanismWire {
                stop: false,
                speed: Some(speed),
                direction: Some(direction),
            },
        }
    }
}

impl TryFrom<MechanismWire> for MechanismCommand {
    type Error = String;

    fn try_from(wire: MechanismWire) -> Result<Self, Self::Error> {
        if wire.stop {
            return Ok(MechanismCommand::Stop);
        }
        match (wire.speed, wire.direction) {
            (Some(speed), Some(direction)) => Ok(MechanismCommand::Run { speed, direction }),
            _ => Err("conveyor command needs either stop or speed and direction".to_string()),
        }
    }
}

/// One instruction of an actuator script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceStep {
    /// Move a servo channel to an absolute angle in degrees
    #[serde(rename = "servo")]
    Actuator { channel: u8, angle: u16 },
    /// Pause in milliseconds
    #[serde(rename = "delay")]
    Delay(u64),
    #[serde(rename = "conveyor")]
    Mechanism(MechanismCommand),
}

impl SequenceStep {
    pub fn actuator(channel: u8, angle: u16) -> Self {
        SequenceStep::Actuator { channel, angle }
    }

    pub fn is_mechanism_stop(&self) -> bool {
        matches!(self, SequenceStep::Mechanism(MechanismCommand::Stop))
    }
}

/// Payload of a `robot_command` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RobotCommand {
    Conveyor { conveyor: MechanismCommand },
    Sequence { sequence: String, steps: Vec<SequenceStep> },
}

impl RobotCommand {
    pub fn conveyor(command: MechanismCommand) -> Self {
        RobotCommand::Conveyor { conveyor: command }
    }

    pub fn custom_sequence(steps: Vec<SequenceStep>) -> Self {
        RobotCommand::Sequence {
            sequence: "custom".to_string(),
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn color(name: &str, area: f64, cx: f32) -> ColorDetection {
        ColorDetection {
            color: name.to_string(),
            area,
            confidence: 1.0,
            bbox: NormalizedBox { x: 0.1, y: 0.1, width: 0.2, height: 0.2 },
            center: NormalizedPoint { x: cx, y: 0.5 },
        }
    }

    #[test]
    fn test_box_from_pixels_divides_once() {
        let bbox = NormalizedBox::from_pixels(64.0, 48.0, 320.0, 240.0, 640, 480).unwrap();
        assert_eq!(bbox, NormalizedBox { x: 0.1, y: 0.1, width: 0.5, height: 0.5 });
        assert!(bbox.is_within_unit());
    }

    #[test]
    fn test_box_from_pixels_zero_frame() {
        assert!(NormalizedBox::from_pixels(0.0, 0.0, 1.0, 1.0, 0, 480).is_none());
        assert!(NormalizedPoint::from_pixels(0.0, 0.0, 640, 0).is_none());
    }

    #[test]
    fn test_report_orders_colors_by_area() {
        let report = FusedReport::assemble(
            vec![color("red", 1000.0, 0.2), color("blue", 2000.0, 0.5), color("green", 1500.0, 0.8)],
            vec![],
            0.0,
        );
        let areas: Vec<f64> = report.color_detections().map(|c| c.area).collect();
        assert_eq!(areas, vec![2000.0, 1500.0, 1000.0]);
    }

    #[test]
    fn test_report_colors_before_objects() {
        let object = ObjectDetection {
            label: "cup".to_string(),
            confidence: 0.9,
            bbox: NormalizedBox { x: 0.0, y: 0.0, width: 0.5, height: 0.5 },
        };
        let report = FusedReport::assemble(vec![color("red", 600.0, 0.5)], vec![object], 1.5);
        assert_eq!(report.len(), 2);
        assert!(matches!(report.detections[0], Detection::Color(_)));
        assert!(matches!(report.detections[1], Detection::Object(_)));
        assert_eq!(report.object_detections().count(), 1);
    }

    #[test]
    fn test_largest_color_tie_keeps_first() {
        let report = FusedReport {
            detections: vec![
                Detection::Color(color("red", 800.0, 0.1)),
                Detection::Color(color("blue", 800.0, 0.9)),
            ],
            timestamp: 0.0,
        };
        assert_eq!(report.largest_color().unwrap().color, "red");
    }

    #[test]
    fn test_detection_wire_shape() {
        let detection = Detection::Color(color("green", 1234.0, 0.5));
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(value["color"], "green");
        assert_eq!(value["confidence"], 1.0);
        assert!(value["bbox"]["width"].is_number());
        assert!(value["center"]["x"].is_number());

        let object = Detection::Object(ObjectDetection {
            label: "person".to_string(),
            confidence: 0.75,
            bbox: NormalizedBox { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
        });
        let value = serde_json::to_value(&object).unwrap();
        assert_eq!(value["class"], "person");
        assert!(value.get("color").is_none());
    }

    #[test]
    fn test_robot_status_running_flag() {
        let status = RobotStatus::new(json!({"conveyor": {"running": true, "speed": 150}}));
        assert!(status.mechanism_running());
        assert!(!status.is_empty());

        let stopped = RobotStatus::new(json!({"conveyor": {"running": false}}));
        assert!(!stopped.mechanism_running());

        let missing = RobotStatus::new(json!({"servos": [90, 90, 90, 90]}));
        assert!(!missing.mechanism_running());
    }

    #[test]
    fn test_robot_status_empty() {
        assert!(RobotStatus::new(json!({})).is_empty());
        assert!(RobotStatus::default().is_empty());
    }

    #[test]
    fn test_step_wire_shape() {
        assert_eq!(
            serde_json::to_value(SequenceStep::actuator(3, 180)).unwrap(),
            json!({"servo": {"channel": 3, "angle": 180}})
        );
        assert_eq!(serde_json::to_value(SequenceStep::Delay(500)).unwrap(), json!({"delay": 500}));
        assert_eq!(
            serde_json::to_value(SequenceStep::Mechanism(MechanismCommand::Stop)).unwrap(),
            json!({"conveyor": {"stop": true}})
        );
        assert_eq!(
            serde_json::to_value(SequenceStep::Mechanism(MechanismCommand::Run { speed: 150, direction: 1 })).unwrap(),
            json!({"conveyor": {"speed": 150, "direction": 1}})
        );
    }

    #[test]
    fn test_mechanism_wire_rejects_incomplete() {
        let result = serde_json::from_value::<MechanismCommand>(json!({"speed": 150}));
        assert!(result.is_err());
    }

    #[test]
    fn test_robot_command_wire_shape() {
        assert_eq!(
            serde_json::to_value(RobotCommand::conveyor(MechanismCommand::Stop)).unwrap(),
            json!({"conveyor": {"stop": true}})
        );
        let sequence = RobotCommand::custom_sequence(vec![
            SequenceStep::actuator(0, 90),
            SequenceStep::Delay(500),
        ]);
        assert_eq!(
            serde_json::to_value(&sequence).unwrap(),
            json!({"sequence": "custom", "steps": [{"servo": {"channel": 0, "angle": 90}}, {"delay": 500}]})
        );
        let parsed: RobotCommand = serde_json::from_value(json!({"conveyor": {"stop": true}})).unwrap();
        assert_eq!(parsed, RobotCommand::conveyor(MechanismCommand::Stop));
    }
}
