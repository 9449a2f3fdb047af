//! sortline-core: shared building blocks for the sortline agent
//!
//! Provides:
//! - The detection data model (color and object detections, fused reports)
//! - Robot status snapshots and actuator sequence steps
//! - Layered configuration (defaults, file, environment)
//! - Core error types

pub mod error;
pub mod types;
pub mod config;

pub use error::{Error, Result, ConfigError};
pub use types::{
    Detection, ColorDetection, ObjectDetection, NormalizedBox, NormalizedPoint,
    FusedReport, RobotStatus, SequenceStep, MechanismCommand, RobotCommand, epoch_seconds,
};
pub use config::{
    SortlineConfig, LinkConfig, VisionConfig, SortingConfig, ArmGeometry,
    ColorProfile, HsvRange, ActuatorTarget,
};
