//! Pick-and-place script generation
//!
//! Every script follows the same template: stop the conveyor, settle, move
//! over the pick point, grip, lift, rotate the base to the color's slot,
//! lower, release, return home and restart the conveyor. Only the slot
//! angle varies between colors.

use crate::error::CnsError;
use serde::Serialize;
use sortline_core::config::{ArmGeometry, SortingConfig, VisionConfig};
use sortline_core::types::{MechanismCommand, RobotCommand, SequenceStep};
use std::collections::HashMap;

/// Number of steps in every generated script.
///
/// The settle pause after the conveyor stop is a step of its own here rather
/// than a sleep on the agent side, so the script is the stop, the settle delay
/// and the 17 motion and pause steps that follow.
pub const TEMPLATE_LEN: usize = 19;

/// Position of the base rotation step within the template
pub const SLOT_STEP_INDEX: usize = 10;

/// Ordered actuator script for one sort
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortScript {
    color: String,
    steps: Vec<SequenceStep>,
}

impl SortScript {
    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn steps(&self) -> &[SequenceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total pause time encoded in the script
    pub fn total_delay_ms(&self) -> u64 {
        self.steps
            .iter()
            .map(|step| match step {
                SequenceStep::Delay(ms) => *ms,
                _ => 0,
            })
            .sum()
    }

    pub fn into_steps(self) -> Vec<SequenceStep> {
        self.steps
    }

    /// Wire commands in send order: a leading conveyor stop goes out on its
    /// own, the rest of the script as one custom sequence
    pub fn into_commands(self) -> Vec<RobotCommand> {
        let mut steps = self.steps;
        let mut commands = Vec::with_capacity(2);
        if steps.first().map_or(false, SequenceStep::is_mechanism_stop) {
            steps.remove(0);
            commands.push(RobotCommand::conveyor(MechanismCommand::Stop));
        }
        commands.push(RobotCommand::custom_sequence(steps));
        commands
    }
}

/// Builds sort scripts from color slots and arm geometry
#[derive(Debug, Clone)]
pub struct SequenceEmitter {
    slots: HashMap<String, u16>,
    arm: ArmGeometry,
    settle_delay_ms: u64,
    step_delay_ms: u64,
    restart: MechanismCommand,
}

impl SequenceEmitter {
    pub fn new(slots: HashMap<String, u16>, sorting: &SortingConfig) -> Self {
        Self {
            slots,
            arm: sorting.arm.clone(),
            settle_delay_ms: sorting.settle_delay_ms,
            step_delay_ms: sorting.step_delay_ms,
            restart: MechanismCommand::Run {
                speed: sorting.restart_speed,
                direction: sorting.restart_direction,
            },
        }
    }

    pub fn from_config(vision: &VisionConfig, sorting: &SortingConfig) -> Self {
        let slots = vision
            .colors
            .iter()
            .map(|profile| (profile.name.clone(), profile.slot_angle))
            .collect();
        Self::new(slots, sorting)
    }

    pub fn slot_angle(&self, color: &str) -> Option<u16> {
        self.slots.get(color).copied()
    }

    /// Script that moves an object of `color` into its slot
    pub fn script(&self, color: &str) -> Result<SortScript, CnsError> {
        let slot = self
            .slot_angle(color)
            .ok_or_else(|| CnsError::UnknownColor(color.to_string()))?;

        let arm = &self.arm;
        let pause = SequenceStep::Delay(self.step_delay_ms);
        let mut steps = Vec::with_capacity(TEMPLATE_LEN);

        steps.push(SequenceStep::Mechanism(MechanismCommand::Stop));
        steps.push(SequenceStep::Delay(self.settle_delay_ms));
        steps.extend(
            arm.pick_pose
                .iter()
                .map(|target| SequenceStep::actuator(target.channel, target.angle)),
        );
        steps.push(SequenceStep::actuator(arm.gripper_channel, arm.grip_angle));
        steps.push(pause);
        steps.push(SequenceStep::actuator(arm.lift_channel, arm.lift_angle));
        steps.push(pause);
        steps.push(SequenceStep::actuator(arm.base_channel, slot));
        steps.push(pause);
        steps.push(SequenceStep::actuator(arm.lift_channel, arm.lower_angle));
        steps.push(pause);
        steps.push(SequenceStep::actuator(arm.gripper_channel, arm.release_angle));
        steps.push(pause);
        steps.extend(
            arm.home_pose
                .iter()
                .map(|target| SequenceStep::actuator(target.channel, target.angle)),
        );
        steps.push(SequenceStep::Mechanism(self.restart));

        if steps.len() != TEMPLATE_LEN {
            return Err(CnsError::Sequence(format!(
                "template produced {} steps, expected {}",
                steps.len(),
                TEMPLATE_LEN
            )));
        }

        Ok(SortScript {
            color: color.to_string(),
            steps,
        })
    }
}
