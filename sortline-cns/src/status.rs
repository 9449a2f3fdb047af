//! Latest-write-wins cache of remote control and robot status

use parking_lot::RwLock;
use sortline_core::types::RobotStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Control flag and robot status as last reported by the relay
#[derive(Debug, Default)]
pub struct StatusCache {
    control_enabled: AtomicBool,
    robot_status: RwLock<Option<Arc<RobotStatus>>>,
    status_updates: AtomicU64,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_control_enabled(&self, enabled: bool) {
        let previous = self.control_enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            debug!("Control flag changed: {} -> {}", previous, enabled);
        }
    }

    pub fn control_enabled(&self) -> bool {
        self.control_enabled.load(Ordering::Acquire)
    }

    /// Replace the status snapshot wholesale
    pub fn set_robot_status(&self, status: RobotStatus) {
        *self.robot_status.write() = Some(Arc::new(status));
        self.status_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot of the latest status, `None` until the first report
    pub fn robot_status(&self) -> Option<Arc<RobotStatus>> {
        self.robot_status.read().clone()
    }

    pub fn status_updates(&self) -> u64 {
        self.status_updates.load(Ordering::Relaxed)
    }
}
