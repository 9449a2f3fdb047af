//! sortline-cns: decision side of the sortline agent
//!
//! Provides:
//! - Latest-write-wins cache of control flag and robot status
//! - Runtime context with sort counters and the frame reentrancy slot
//! - Sort gate deciding when a detection becomes a physical action
//! - Deterministic pick-and-place sequence emission

pub mod error;
pub mod status;
pub mod context;
pub mod gate;
pub mod sequence;

pub use error::CnsError;
pub use status::StatusCache;
pub use context::{RuntimeContext, ProcessingSlot, SlotGuard};
pub use gate::{SortGate, GateDecision};
pub use sequence::{SequenceEmitter, SortScript};
