//! Shared runtime state for one agent process

use crate::status::StatusCache;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-occupancy slot; at most one frame is processed at a time
#[derive(Debug, Default)]
pub struct ProcessingSlot {
    busy: AtomicBool,
}

impl ProcessingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot, or `None` if a frame is already in flight
    pub fn try_enter(self: &Arc<Self>) -> Option<SlotGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SlotGuard { slot: Arc::clone(self) })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases the slot when dropped, on every exit path
#[derive(Debug)]
pub struct SlotGuard {
    slot: Arc<ProcessingSlot>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

/// Status cache, per-color sort counters, frame slot and last frame size
#[derive(Debug)]
pub struct RuntimeContext {
    status: StatusCache,
    counters: Mutex<BTreeMap<String, u64>>,
    slot: Arc<ProcessingSlot>,
    last_frame: Mutex<Option<(u32, u32)>>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeContext {
    pub fn new() -> Self {
        Self {
            status: StatusCache::new(),
            counters: Mutex::new(BTreeMap::new()),
            slot: Arc::new(ProcessingSlot::new()),
            last_frame: Mutex::new(None),
        }
    }

    /// Context with a zero counter for every palette color
    pub fn with_palette<'a, I>(colors: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ctx = Self::new();
        {
            let mut counters = ctx.counters.lock();
            for color in colors {
                counters.insert(color.to_string(), 0);
            }
        }
        ctx
    }

    pub fn status(&self) -> &StatusCache {
        &self.status
    }

    pub fn slot(&self) -> &Arc<ProcessingSlot> {
        &self.slot
    }

    /// Bump the sort counter for `color`, returning the new total
    pub fn record_sort(&self, color: &str) -> u64 {
        let mut counters = self.counters.lock();
        let count = counters.entry(color.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn sort_count(&self, color: &str) -> u64 {
        self.counters.lock().get(color).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters.lock().clone()
    }

    pub fn total_sorted(&self) -> u64 {
        self.counters.lock().values().sum()
    }

    pub fn record_frame(&self, width: u32, height: u32) {
        *self.last_frame.lock() = Some((width, height));
    }

    pub fn last_frame_size(&self) -> Option<(u32, u32)> {
        *self.last_frame.lock()
    }
}
