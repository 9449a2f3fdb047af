// Layered configuration for the sortline agent: defaults, file, environment

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Servo channels are addressed 0..=15 on the arm controller
pub const MAX_CHANNEL: u8 = 15;
/// Servo angles are absolute degrees
pub const MAX_ANGLE: u16 = 180;
/// OpenCV-style 8-bit hue tops out at 180
pub const MAX_HUE: u8 = 180;

/// Connection to the relay server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Websocket endpoint, including the role discriminator query
    pub url: String,
    /// Fixed pause between a lost connection and the next attempt
    pub reconnect_delay_ms: u64,
    /// Upper bound on one connection attempt
    pub connect_timeout_ms: u64,
    /// Identity announced in the hello message
    pub client_name: String,
    pub client_version: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3000/?type=ai".to_string(),
            reconnect_delay_ms: 5000,
            connect_timeout_ms: 10_000,
            client_name: "ai_vision".to_string(),
            client_version: "1.0".to_string(),
        }
    }
}

impl LinkConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Inclusive HSV interval, 8-bit scale (H 0..=180, S and V 0..=255)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|i| self.lower[i] <= hsv[i] && hsv[i] <= self.upper[i])
    }
}

/// A sortable color: how to find it and where it goes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorProfile {
    pub name: String,
    /// Union of these intervals forms the color mask
    pub ranges: Vec<HsvRange>,
    /// Base rotation that places the object in this color's bin
    pub slot_angle: u16,
}

impl ColorProfile {
    pub fn new(name: &str, ranges: Vec<HsvRange>, slot_angle: u16) -> Self {
        Self {
            name: name.to_string(),
            ranges,
            slot_angle,
        }
    }
}

/// Detection thresholds and palette
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Color regions must be strictly larger than this many square pixels
    pub min_color_area: f64,
    /// Object boxes must be strictly more confident than this
    pub min_confidence: f32,
    pub colors: Vec<ColorProfile>,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            min_color_area: 500.0,
            min_confidence: 0.5,
            colors: vec![
                ColorProfile::new(
                    "red",
                    vec![
                        HsvRange::new([0, 100, 100], [10, 255, 255]),
                        HsvRange::new([160, 100, 100], [180, 255, 255]),
                    ],
                    180,
                ),
                ColorProfile::new("green", vec![HsvRange::new([40, 100, 100], [80, 255, 255])], 90),
                ColorProfile::new("blue", vec![HsvRange::new([100, 100, 100], [140, 255, 255])], 0),
            ],
        }
    }
}

impl VisionConfig {
    pub fn color(&self, name: &str) -> Option<&ColorProfile> {
        self.colors.iter().find(|c| c.name == name)
    }
}

/// Servo target used in poses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorTarget {
    pub channel: u8,
    pub angle: u16,
}

impl ActuatorTarget {
    pub const fn new(channel: u8, angle: u16) -> Self {
        Self { channel, angle }
    }
}

/// Arm poses and channel roles used by the sort script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmGeometry {
    /// Pose above the pick point, in move order
    pub pick_pose: [ActuatorTarget; 4],
    pub base_channel: u8,
    pub lift_channel: u8,
    pub gripper_channel: u8,
    pub grip_angle: u16,
    pub release_angle: u16,
    pub lift_angle: u16,
    pub lower_angle: u16,
    /// Pose after release, in move order
    pub home_pose: [ActuatorTarget; 2],
}

impl Default for ArmGeometry {
    fn default() -> Self {
        Self {
            pick_pose: [
                ActuatorTarget::new(0, 90),
                ActuatorTarget::new(1, 60),
                ActuatorTarget::new(2, 120),
                ActuatorTarget::new(3, 90),
            ],
            base_channel: 0,
            lift_channel: 1,
            gripper_channel: 3,
            grip_angle: 180,
            release_angle: 90,
            lift_angle: 90,
            lower_angle: 60,
            home_pose: [ActuatorTarget::new(1, 90), ActuatorTarget::new(0, 90)],
        }
    }
}

/// Sort gate and sequence template parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortingConfig {
    /// Inclusive horizontal band in which an object counts as centered
    pub center_band: (f32, f32),
    /// Wait after stopping the conveyor
    pub settle_delay_ms: u64,
    /// Wait after each arm motion
    pub step_delay_ms: u64,
    pub restart_speed: u16,
    pub restart_direction: i8,
    pub arm: ArmGeometry,
}

impl Default for SortingConfig {
    fn default() -> Self {
        Self {
            center_band: (0.4, 0.6),
            settle_delay_ms: 500,
            step_delay_ms: 500,
            restart_speed: 150,
            restart_direction: 1,
            arm: ArmGeometry::default(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortlineConfig {
    pub link: LinkConfig,
    pub vision: VisionConfig,
    pub sorting: SortingConfig,
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for SortlineConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            vision: VisionConfig::default(),
            sorting: SortingConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl SortlineConfig {
    /// Load configuration from a JSON, TOML or YAML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path, e)))?;

        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".toml") {
            return toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()));
        }
        if lower.ends_with(".yaml") || lower.ends_with(".yml") {
            return serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()));
        }
        if lower.ends_with(".json") {
            return serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()));
        }
        Self::from_str(&content)
    }

    /// Load configuration from a string, trying JSON, TOML then YAML
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        if let Ok(config) = serde_json::from_str::<SortlineConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = toml::from_str::<SortlineConfig>(content) {
            return Ok(config);
        }

        if let Ok(config) = serde_yaml::from_str::<SortlineConfig>(content) {
            return Ok(config);
        }

        Err(ConfigError::ParseError("Unknown format".to_string()))
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup (`SORTLINE_*` names)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SORTLINE_URL") {
            self.link.url = url;
        }

        if let Some(delay) = lookup("SORTLINE_RECONNECT_DELAY_MS") {
            self.link.reconnect_delay_ms = delay.trim().parse().map_err(|_| {
                ConfigError::ParseError(format!("SORTLINE_RECONNECT_DELAY_MS is not a number: '{}'", delay))
            })?;
        }

        if let Some(level) = lookup("SORTLINE_LOG_LEVEL") {
            self.log_level = level;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_link()?;
        self.validate_vision()?;
        self.validate_sorting()?;
        Ok(())
    }

    fn validate_link(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.link.url)
            .map_err(|e| ConfigError::ValidationError(format!("link.url '{}' is invalid: {}", self.link.url, e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(ConfigError::ValidationError(
                "link.url must use ws:// or wss://".to_string(),
            ));
        }

        if self.link.reconnect_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "link.reconnect_delay_ms must be > 0".to_string(),
            ));
        }

        if self.link.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "link.connect_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.link.client_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "link.client_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_vision(&self) -> Result<(), ConfigError> {
        let vision = &self.vision;

        if !vision.min_color_area.is_finite() || vision.min_color_area < 0.0 {
            return Err(ConfigError::ValidationError(
                "vision.min_color_area must be a non-negative number".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&vision.min_confidence) {
            return Err(ConfigError::ValidationError(
                "vision.min_confidence must be between 0 and 1".to_string(),
            ));
        }

        if vision.colors.is_empty() {
            return Err(ConfigError::ValidationError(
                "vision.colors must name at least one color".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for profile in &vision.colors {
            if profile.name.trim().is_empty() {
                return Err(ConfigError::ValidationError("color name cannot be empty".to_string()));
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "color '{}' is configured twice",
                    profile.name
                )));
            }
            if profile.ranges.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "color '{}' needs at least one HSV range",
                    profile.name
                )));
            }
            for range in &profile.ranges {
                if (0..3).any(|i| range.lower[i] > range.upper[i]) {
                    return Err(ConfigError::ValidationError(format!(
                        "color '{}' has a range with lower bound above upper bound",
                        profile.name
                    )));
                }
                if range.upper[0] > MAX_HUE {
                    return Err(ConfigError::ValidationError(format!(
                        "color '{}' hue exceeds {}",
                        profile.name, MAX_HUE
                    )));
                }
            }
            if profile.slot_angle > MAX_ANGLE {
                return Err(ConfigError::ValidationError(format!(
                    "color '{}' slot angle exceeds {} degrees",
                    profile.name, MAX_ANGLE
                )));
            }
        }

        Ok(())
    }

    fn validate_sorting(&self) -> Result<(), ConfigError> {
        let sorting = &self.sorting;
        let (low, high) = sorting.center_band;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low > high {
            return Err(ConfigError::ValidationError(
                "sorting.center_band must satisfy 0 <= low <= high <= 1".to_string(),
            ));
        }

        let arm = &sorting.arm;
        let channels = arm
            .pick_pose
            .iter()
            .chain(arm.home_pose.iter())
            .map(|t| t.channel)
            .chain([arm.base_channel, arm.lift_channel, arm.gripper_channel]);
        for channel in channels {
            if channel > MAX_CHANNEL {
                return Err(ConfigError::ValidationError(format!(
                    "servo channel {} exceeds {}",
                    channel, MAX_CHANNEL
                )));
            }
        }

        let angles = arm
            .pick_pose
            .iter()
            .chain(arm.home_pose.iter())
            .map(|t| t.angle)
            .chain([arm.grip_angle, arm.release_angle, arm.lift_angle, arm.lower_angle]);
        for angle in angles {
            if angle > MAX_ANGLE {
                return Err(ConfigError::ValidationError(format!(
                    "servo angle {} exceeds {} degrees",
                    angle, MAX_ANGLE
                )));
            }
        }

        Ok(())
    }
}
